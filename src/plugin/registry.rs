use crate::error::{Error, Result};
use crate::issue::IssueType;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Analyzer, AnalyzerManifest, AnalyzerOrigin};

/// A validated, registered analyzer.
#[derive(Clone)]
pub struct RegisteredAnalyzer {
    pub manifest: AnalyzerManifest,
    pub origin: AnalyzerOrigin,
    pub analyzer: Arc<dyn Analyzer>,
}

/// Registry of available analyzers, indexed by name.
///
/// Registration validates the manifest before any side effect; duplicate
/// names are rejected so built-ins cannot be silently shadowed.
#[derive(Default)]
pub struct PluginRegistry {
    analyzers: Vec<RegisteredAnalyzer>,
    name_index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        manifest: AnalyzerManifest,
        origin: AnalyzerOrigin,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<()> {
        manifest.validate(origin)?;
        if self.name_index.contains_key(&manifest.name) {
            return Err(Error::PluginAlreadyExists(manifest.name));
        }
        if manifest.name != analyzer.name() {
            return Err(Error::InvalidPlugin(format!(
                "manifest name '{}' does not match analyzer name '{}'",
                manifest.name,
                analyzer.name()
            )));
        }
        self.name_index
            .insert(manifest.name.clone(), self.analyzers.len());
        self.analyzers.push(RegisteredAnalyzer {
            manifest,
            origin,
            analyzer,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredAnalyzer> {
        self.name_index.get(name).map(|&i| &self.analyzers[i])
    }

    pub fn list_all(&self) -> &[RegisteredAnalyzer] {
        &self.analyzers
    }

    /// Enabled analyzers covering the requested issue types, built-ins
    /// first, registration order within each group.
    pub fn list_for(&self, issue_types: &[IssueType]) -> Vec<RegisteredAnalyzer> {
        let mut selected: Vec<RegisteredAnalyzer> = self
            .analyzers
            .iter()
            .filter(|a| a.manifest.covers(issue_types))
            .cloned()
            .collect();
        selected.sort_by_key(|a| match a.origin {
            AnalyzerOrigin::Builtin => 0,
            AnalyzerOrigin::External => 1,
        });
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::plugin::Finding;
    use crate::snapshot::Snapshot;
    use async_trait::async_trait;

    struct NullAnalyzer {
        name: String,
        types: Vec<IssueType>,
    }

    #[async_trait]
    impl Analyzer for NullAnalyzer {
        fn name(&self) -> &str {
            &self.name
        }

        fn issue_types(&self) -> Vec<IssueType> {
            self.types.clone()
        }

        async fn detect(
            &self,
            _snapshot: &Snapshot,
            _config: &AnalysisConfig,
        ) -> crate::error::Result<Vec<Finding>> {
            Ok(Vec::new())
        }
    }

    fn null(name: &str, types: Vec<IssueType>) -> (AnalyzerManifest, Arc<dyn Analyzer>) {
        (
            AnalyzerManifest::builtin(name, "", types.clone()),
            Arc::new(NullAnalyzer {
                name: name.to_string(),
                types,
            }),
        )
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = PluginRegistry::new();
        let (m1, a1) = null("stub", vec![IssueType::Stub]);
        let (m2, a2) = null("stub", vec![IssueType::Stub]);
        registry.register(m1, AnalyzerOrigin::Builtin, a1).unwrap();
        let err = registry
            .register(m2, AnalyzerOrigin::External, a2)
            .unwrap_err();
        assert!(matches!(err, Error::PluginAlreadyExists(_)));
        assert_eq!(registry.list_all().len(), 1);
    }

    #[test]
    fn rejects_invalid_manifest_before_registration() {
        let mut registry = PluginRegistry::new();
        let (mut manifest, analyzer) = null("bad", vec![IssueType::Bug]);
        manifest.issue_types.clear();
        assert!(registry
            .register(manifest, AnalyzerOrigin::Builtin, analyzer)
            .is_err());
        assert!(registry.list_all().is_empty());
    }

    #[test]
    fn list_for_filters_and_orders_builtins_first() {
        let mut registry = PluginRegistry::new();
        let (m1, a1) = null("external-lint", vec![IssueType::LintError]);
        let (m2, a2) = null("builtin-lint", vec![IssueType::LintError]);
        let (m3, a3) = null("security", vec![IssueType::Security]);
        registry.register(m1, AnalyzerOrigin::External, a1).unwrap();
        registry.register(m2, AnalyzerOrigin::Builtin, a2).unwrap();
        registry.register(m3, AnalyzerOrigin::Builtin, a3).unwrap();

        let lint = registry.list_for(&[IssueType::LintError]);
        assert_eq!(lint.len(), 2);
        assert_eq!(lint[0].manifest.name, "builtin-lint");
        assert_eq!(lint[1].manifest.name, "external-lint");

        let all = registry.list_for(&[]);
        assert_eq!(all.len(), 3);
    }
}
