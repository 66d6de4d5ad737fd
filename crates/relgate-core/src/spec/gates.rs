use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{CriterionOp, MetricValue, Priority, UnitFloat};

/// Static definition of a quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    pub id: String,
    pub name: String,
    pub category: String,
    pub priority: Priority,

    #[serde(default)]
    pub required: bool,

    /// Only meaningful on a required gate.
    #[serde(default)]
    pub blocking: bool,

    pub threshold: UnitFloat,

    #[serde(default)]
    pub criteria: Vec<Criterion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One relational comparison between a named measurement and an expected value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub metric: String,
    pub operator: CriterionOp,
    pub expected: MetricValue,
}

impl Criterion {
    pub fn new(metric: impl Into<String>, operator: CriterionOp, expected: impl Into<MetricValue>) -> Self {
        Self {
            metric: metric.into(),
            operator,
            expected: expected.into(),
        }
    }
}

/// Declarative metrics provider wiring for config-driven registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProviderSpec {
    /// Scalars of the object at `results[section]` become metrics.
    Section { section: String },
    /// Each metric is read from a JSON pointer into the raw results.
    Pointers { metrics: BTreeMap<String, String> },
}
