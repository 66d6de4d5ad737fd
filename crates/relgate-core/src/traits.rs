use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::types::{MetricValue, Severity};

/// A finding reported by a metrics provider or by the evaluator itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl Issue {
    pub fn new(kind: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity,
            message: message.into(),
            metric: None,
        }
    }
}

/// Measurements for one gate, as produced by its provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl MetricReport {
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }
}

/// Turns raw test results into named measurements for one gate.
///
/// Implementations must be deterministic for the same input and should omit a
/// metric they cannot compute rather than fail. An `Err` marks the whole gate
/// as errored.
pub trait MetricsProvider: Send + Sync {
    fn collect(&self, results: &serde_json::Value) -> Result<MetricReport, ProviderError>;

    fn describe(&self) -> String {
        "custom metrics provider".to_string()
    }
}
