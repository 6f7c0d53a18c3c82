//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fix code-quality defects automatically
#[derive(Parser)]
#[command(name = "mender")]
#[command(about = "Detect and remediate code-quality defects with revertible commits", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a repository and remediate the backlog
    Run {
        /// Repository checkout to operate on
        path: PathBuf,

        /// Branch the session runs against
        #[arg(long, default_value = "main")]
        branch: String,

        /// Path to a configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Scan a repository and print the merged findings without fixing
    Analyze {
        path: PathBuf,

        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// List built-in analyzers and discovered plugins
    Plugins {
        /// Plugin directory to scan
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Revert a commit recorded by a previous session
    Revert {
        /// Repository checkout the commit lives in
        path: PathBuf,

        /// Session that recorded the commit
        #[arg(long)]
        session: String,

        /// Hash of the commit to revert
        #[arg(long)]
        hash: String,

        /// Why the commit is being reverted
        #[arg(long)]
        reason: String,

        /// Hard-reset instead of creating a revert commit
        #[arg(long)]
        hard: bool,
    },
}
