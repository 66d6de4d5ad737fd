use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::gates::GateSpec;
use crate::traits::Issue;
use crate::types::{
    CriterionOp, GateStatus, MetricValue, OverallStatus, Priority, Severity, UnitFloat,
};

/// Outcome of a single criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub metric: String,
    pub operator: CriterionOp,
    pub expected: MetricValue,
    pub actual: Option<MetricValue>,
    pub passed: bool,
    pub message: String,
}

/// Outcome of evaluating one gate once.
///
/// Carries no timestamps: identical inputs give identical results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_id: String,
    pub gate_name: String,
    pub category: String,
    pub priority: Priority,
    pub status: GateStatus,
    pub score: UnitFloat,
    pub threshold: UnitFloat,
    #[serde(default)]
    pub criteria: Vec<CriterionResult>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_id: Option<String>,
}

impl GateResult {
    fn base(gate: &GateSpec, status: GateStatus, score: UnitFloat) -> Self {
        Self {
            gate_id: gate.id.clone(),
            gate_name: gate.name.clone(),
            category: gate.category.clone(),
            priority: gate.priority,
            status,
            score,
            threshold: gate.threshold,
            criteria: Vec::new(),
            issues: Vec::new(),
            recommendations: Vec::new(),
            metrics_hash: None,
            bypass_id: None,
        }
    }

    /// Gate waived by an approved bypass request.
    pub fn bypassed(gate: &GateSpec, bypass_id: &str, reason: &str) -> Self {
        let mut result = Self::base(gate, GateStatus::Bypassed, UnitFloat::ONE);
        result.bypass_id = Some(bypass_id.to_string());
        result.issues.push(Issue::new(
            "bypassed",
            Severity::Info,
            format!("gate bypassed by approved request {bypass_id}: {reason}"),
        ));
        result
    }

    /// Gate that could not be evaluated.
    pub fn error(gate: &GateSpec, kind: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut result = Self::base(gate, GateStatus::Error, UnitFloat::ZERO);
        result.issues.push(Issue::new(kind, Severity::High, message.clone()));
        result
            .recommendations
            .push(format!("Re-run evaluation for {}: {message}", gate.name));
        result
    }

    /// Scored gate with criterion detail.
    pub fn scored(gate: &GateSpec, status: GateStatus, score: UnitFloat) -> Self {
        Self::base(gate, status, score)
    }
}

/// Counts over all evaluated gates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub bypassed: usize,
    pub blocked: usize,
    pub errored: usize,
    pub pass_rate: f64,
}

/// Free-text guidance attached to an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<String>,
    pub priority: Priority,
    pub message: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Why an evaluation stopped before every gate finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    Timeout,
    Cancelled,
}

/// Complete, immutable result of running one policy once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub evaluation_id: String,
    pub policy_name: String,
    pub overall_status: OverallStatus,
    pub gates: BTreeMap<String, GateResult>,
    pub summary: EvaluationSummary,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interruption: Option<Interruption>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Evaluation {
    pub fn gate(&self, gate_id: &str) -> Option<&GateResult> {
        self.gates.get(gate_id)
    }
}
