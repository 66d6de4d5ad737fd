//! Built-in metrics providers.
//!
//! The engine never fabricates measurements: these adapters only read what
//! the test pipeline already put into the raw results.

use std::sync::Arc;

use serde_json::Value;

use relgate_core::errors::ProviderError;
use relgate_core::spec::gates::ProviderSpec;
use relgate_core::traits::{Issue, MetricReport, MetricsProvider};
use relgate_core::types::MetricValue;

/// Build the provider described by a config entry.
pub fn from_spec(spec: &ProviderSpec) -> Arc<dyn MetricsProvider> {
    match spec {
        ProviderSpec::Section { section } => Arc::new(SectionProvider::new(section.clone())),
        ProviderSpec::Pointers { metrics } => Arc::new(PointerProvider::new(metrics.clone())),
    }
}

/// Reads `results[section]`: numeric and boolean fields become metrics and an
/// optional `issues` array becomes issues.
#[derive(Debug, Clone)]
pub struct SectionProvider {
    section: String,
}

impl SectionProvider {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
        }
    }
}

impl MetricsProvider for SectionProvider {
    fn collect(&self, results: &Value) -> Result<MetricReport, ProviderError> {
        let section = results
            .get(&self.section)
            .ok_or_else(|| ProviderError::MissingSection(self.section.clone()))?;
        let obj = section
            .as_object()
            .ok_or_else(|| ProviderError::MalformedSection(self.section.clone()))?;

        let mut report = MetricReport::default();
        for (key, value) in obj {
            if key == "issues" {
                continue;
            }
            if let Some(metric) = MetricValue::from_json(value) {
                report.metrics.insert(key.clone(), metric);
            }
        }

        if let Some(issues) = obj.get("issues") {
            report.issues = parse_issues(&self.section, issues)?;
        }
        Ok(report)
    }

    fn describe(&self) -> String {
        format!("section provider ({})", self.section)
    }
}

fn parse_issues(section: &str, issues: &Value) -> Result<Vec<Issue>, ProviderError> {
    serde_json::from_value(issues.clone()).map_err(|e| {
        ProviderError::Failed(format!("results section '{section}' has malformed issues: {e}"))
    })
}

/// Reads each metric from a JSON pointer. Unresolvable pointers are omitted.
#[derive(Debug, Clone)]
pub struct PointerProvider {
    pointers: Vec<(String, String)>,
}

impl PointerProvider {
    pub fn new<I, K, P>(pointers: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<String>,
    {
        Self {
            pointers: pointers
                .into_iter()
                .map(|(k, p)| (k.into(), p.into()))
                .collect(),
        }
    }
}

impl MetricsProvider for PointerProvider {
    fn collect(&self, results: &Value) -> Result<MetricReport, ProviderError> {
        let mut report = MetricReport::default();
        for (name, pointer) in &self.pointers {
            if let Some(metric) = results.pointer(pointer).and_then(MetricValue::from_json) {
                report.metrics.insert(name.clone(), metric);
            }
        }
        Ok(report)
    }

    fn describe(&self) -> String {
        format!("pointer provider ({} metrics)", self.pointers.len())
    }
}

/// Provider backed by a closure, for programmatic registration.
pub struct FnProvider<F> {
    collect_fn: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&Value) -> Result<MetricReport, ProviderError> + Send + Sync,
{
    pub fn new(collect_fn: F) -> Self {
        Self { collect_fn }
    }
}

impl<F> MetricsProvider for FnProvider<F>
where
    F: Fn(&Value) -> Result<MetricReport, ProviderError> + Send + Sync,
{
    fn collect(&self, results: &Value) -> Result<MetricReport, ProviderError> {
        (self.collect_fn)(results)
    }
}
