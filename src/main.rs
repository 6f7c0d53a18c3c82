use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mender::analysis::{register_builtins, AnalysisOrchestrator};
use mender::cli::{Cli, Commands};
use mender::config::MenderConfig;
use mender::git::{CommitManager, RevertMode, RevertOptions};
use mender::llm::{CompletionProvider, MockProvider};
use mender::plugin::{AnalyzerOrigin, PluginLoader, PluginRegistry};
use mender::session::{ProgressEvent, SessionController, SessionId};
use mender::store::{default_state_dir, JsonStore, Store};
use mender::subprocess::{ProcessRunner, TokioProcessRunner};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            path,
            branch,
            config,
        } => run(&path, &branch, config).await,
        Commands::Analyze { path, config } => analyze(&path, config).await,
        Commands::Plugins { dir } => plugins(dir).await,
        Commands::Revert {
            path,
            session,
            hash,
            reason,
            hard,
        } => revert(&path, session, hash, reason, hard).await,
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "mender=info",
        1 => "mender=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

async fn load_config(path: Option<PathBuf>) -> Result<MenderConfig> {
    match path {
        Some(path) => MenderConfig::load(&path)
            .await
            .with_context(|| format!("loading config from {path:?}")),
        None => Ok(MenderConfig::default()),
    }
}

async fn build_registry(
    config: &MenderConfig,
    runner: Arc<dyn ProcessRunner>,
) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry)?;
    if let Some(dir) = &config.analysis.plugin_dir {
        let loader = PluginLoader::new(runner);
        let report = loader.discover(dir).await?;
        for failure in &report.failed {
            eprintln!("warning: skipped plugin at {:?}: {}", failure.path, failure.error);
        }
        for (manifest, analyzer) in report.loaded {
            registry.register(manifest, AnalyzerOrigin::External, analyzer)?;
        }
    }
    Ok(registry)
}

fn select_provider(config: &MenderConfig) -> Result<Arc<dyn CompletionProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => bail!(
            "provider '{other}' is served by the external provider bridge; \
             this binary only bundles 'mock'"
        ),
    }
}

async fn run(path: &Path, branch: &str, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path).await?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let registry = Arc::new(build_registry(&config, Arc::clone(&runner)).await?);
    let provider = select_provider(&config)?;
    let store: Arc<dyn Store> = Arc::new(JsonStore::new(&default_state_dir()));

    let events = Arc::new(|event: ProgressEvent| {
        println!("{}", event.description());
    });
    let controller = SessionController::new(store, registry, provider, runner, events);

    // Ctrl-C requests a cooperative stop; the working copy stays at the
    // last fully-committed state.
    let control = controller.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing current step");
            control.request_stop();
        }
    });

    let session = controller.create_session(path, branch, config).await?;
    let finished = controller.run(&session.id).await?;
    println!(
        "Session {} ended with status {:?}: {} resolved, {} failed, {} skipped of {}",
        finished.id,
        finished.status,
        finished.counters.resolved_issues,
        finished.counters.failed_issues,
        finished.counters.skipped_issues,
        finished.counters.total_issues,
    );
    Ok(())
}

async fn analyze(path: &Path, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path).await?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let registry = Arc::new(build_registry(&config, runner).await?);
    let orchestrator = AnalysisOrchestrator::new(registry);

    let result = orchestrator.analyze(path, &config, None).await?;
    for warning in &result.warnings {
        eprintln!("warning: analyzer '{}': {}", warning.analyzer, warning.error);
    }
    for finding in &result.findings {
        println!(
            "{}:{} [{}/{:?}] {} ({})",
            finding.file_path,
            finding.line,
            finding.issue_type,
            finding.severity,
            finding.message,
            finding.source,
        );
    }
    println!(
        "{} findings from {} analyzers",
        result.findings.len(),
        result.analyzers_run
    );
    Ok(())
}

async fn plugins(dir: Option<PathBuf>) -> Result<()> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry)?;
    if let Some(dir) = dir {
        let loader = PluginLoader::new(runner);
        let report = loader.discover(&dir).await?;
        for (manifest, analyzer) in report.loaded {
            registry.register(manifest, AnalyzerOrigin::External, analyzer)?;
        }
        for failure in &report.failed {
            eprintln!("failed: {:?}: {}", failure.path, failure.error);
        }
    }
    for entry in registry.list_all() {
        println!(
            "{} v{} [{:?}] - {}",
            entry.manifest.name, entry.manifest.version, entry.origin, entry.manifest.description
        );
    }
    Ok(())
}

async fn revert(
    path: &Path,
    session: String,
    hash: String,
    reason: String,
    hard: bool,
) -> Result<()> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let store: Arc<dyn Store> = Arc::new(JsonStore::new(&default_state_dir()));
    let manager = CommitManager::new(runner, path, SessionId::from_string(session), store);

    let result = manager
        .revert(RevertOptions {
            hash: hash.clone(),
            reason,
            mode: if hard {
                RevertMode::HardReset
            } else {
                RevertMode::RevertCommit
            },
        })
        .await?;
    match result.revert_hash {
        Some(revert_hash) => println!("Reverted {hash} with new commit {revert_hash}"),
        None => println!("Reverted {hash} with a hard reset"),
    }
    Ok(())
}
