use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use relgate_core::errors::ProviderError;
use relgate_core::evaluation::GateResult;
use relgate_core::spec::gates::GateSpec;
use relgate_core::traits::MetricReport;
use relgate_core::types::{GateStatus, MetricValue, UnitFloat};

use super::advice;
use crate::criterion;
use crate::registry::Gate;

/// Deterministic single-gate evaluator.
///
/// Algorithm:
/// 1. Invoke the gate's metrics provider (a provider error becomes `status=error`)
/// 2. Evaluate every criterion against the reported metrics
/// 3. score = passed / total, 1.0 for a gate without criteria
/// 4. status = passed iff score >= threshold
/// 5. On failure, one recommendation per failing criterion
pub struct DefaultGateEvaluator;

impl DefaultGateEvaluator {
    pub fn evaluate(&self, gate: &Gate, results: &serde_json::Value) -> GateResult {
        let outcome = gate.provider.collect(results);
        self.finish(&gate.spec, outcome)
    }

    /// Turn a provider outcome into a result.
    pub fn finish(
        &self,
        spec: &GateSpec,
        outcome: Result<MetricReport, ProviderError>,
    ) -> GateResult {
        match outcome {
            Ok(report) => self.score(spec, report),
            Err(e) => {
                warn!(gate = %spec.id, error = %e, "metrics provider failed");
                GateResult::error(spec, "evaluation_error", e.to_string())
            }
        }
    }

    /// Score a gate against an already collected metric report.
    pub fn score(&self, spec: &GateSpec, report: MetricReport) -> GateResult {
        let criteria: Vec<_> = spec
            .criteria
            .iter()
            .map(|c| criterion::evaluate(c, &report.metrics))
            .collect();

        let passed = criteria.iter().filter(|c| c.passed).count();
        let score = UnitFloat::ratio(passed, criteria.len());
        let status = if score >= spec.threshold {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };

        debug!(
            gate = %spec.id,
            passed,
            total = criteria.len(),
            score = score.value(),
            threshold = spec.threshold.value(),
            %status,
            "gate scored"
        );

        let mut result = GateResult::scored(spec, status, score);
        if status == GateStatus::Failed {
            for c in criteria.iter().filter(|c| !c.passed) {
                let advice = advice::for_metric(&c.metric);
                if !result.recommendations.contains(&advice) {
                    result.recommendations.push(advice);
                }
            }
        }
        result.metrics_hash = Some(compute_metrics_hash(&report.metrics));
        result.criteria = criteria;
        result.issues = report.issues;
        result
    }
}

/// Deterministic hash of a metrics snapshot.
pub fn compute_metrics_hash(snapshot: &BTreeMap<String, MetricValue>) -> String {
    let canonical: Vec<String> = snapshot.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    let joined = canonical.join(",");
    format!("sha256:{:x}", Sha256::digest(joined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use relgate_core::spec::gates::Criterion;
    use relgate_core::traits::{Issue, MetricsProvider};
    use relgate_core::types::{CriterionOp, Priority, Severity};

    use crate::providers::FnProvider;

    fn spec(id: &str, threshold: f64, criteria: Vec<Criterion>) -> GateSpec {
        GateSpec {
            id: id.into(),
            name: id.into(),
            category: "security".into(),
            priority: Priority::Critical,
            required: true,
            blocking: true,
            threshold: UnitFloat::new(threshold).unwrap(),
            criteria,
            provider: None,
            description: None,
        }
    }

    fn gate(spec: GateSpec, report: MetricReport) -> Gate {
        let provider: Arc<dyn MetricsProvider> =
            Arc::new(FnProvider::new(move |_| Ok(report.clone())));
        Gate { spec, provider }
    }

    fn security_criteria() -> Vec<Criterion> {
        vec![
            Criterion::new("critical_vulnerabilities", CriterionOp::Eq, 0.0),
            Criterion::new("high_vulnerabilities", CriterionOp::Lte, 0.0),
            Criterion::new("secrets_detected", CriterionOp::Eq, false),
            Criterion::new("dependency_audit_passed", CriterionOp::Eq, true),
            Criterion::new("security_score", CriterionOp::Gte, 90.0),
        ]
    }

    #[test]
    fn four_of_five_below_strict_threshold_fails() {
        let report = MetricReport::default()
            .with_metric("critical_vulnerabilities", 0.0)
            .with_metric("high_vulnerabilities", 2.0)
            .with_metric("secrets_detected", false)
            .with_metric("dependency_audit_passed", true)
            .with_metric("security_score", 95.0);
        let g = gate(spec("security-gate", 0.98, security_criteria()), report);

        let result = DefaultGateEvaluator.evaluate(&g, &serde_json::Value::Null);
        assert_eq!(result.score.value(), 0.8);
        assert_eq!(result.status, GateStatus::Failed);
        assert_eq!(
            result.recommendations,
            vec!["Patch or mitigate high-severity vulnerabilities".to_string()]
        );
        assert_eq!(result.criteria.len(), 5);
        assert!(!result.criteria[1].passed);
    }

    #[test]
    fn zero_criteria_scores_one_and_passes() {
        let g = gate(spec("empty", 1.0, vec![]), MetricReport::default());
        let result = DefaultGateEvaluator.evaluate(&g, &serde_json::Value::Null);
        assert_eq!(result.score, UnitFloat::ONE);
        assert_eq!(result.status, GateStatus::Passed);
    }

    #[test]
    fn status_tracks_threshold_exactly() {
        let criteria = vec![
            Criterion::new("a", CriterionOp::Gte, 1.0),
            Criterion::new("b", CriterionOp::Gte, 1.0),
        ];
        let report = MetricReport::default().with_metric("a", 1.0);
        let at = DefaultGateEvaluator.score(&spec("g", 0.5, criteria.clone()), report.clone());
        assert_eq!(at.status, GateStatus::Passed);
        let above = DefaultGateEvaluator.score(&spec("g", 0.51, criteria), report);
        assert_eq!(above.status, GateStatus::Failed);
    }

    #[test]
    fn missing_metric_counts_as_failed_criterion() {
        let criteria = vec![Criterion::new("test_success_rate", CriterionOp::Gte, 0.95)];
        let result = DefaultGateEvaluator.score(&spec("tests", 1.0, criteria), MetricReport::default());
        assert_eq!(result.status, GateStatus::Failed);
        assert_eq!(result.criteria[0].message, "metric not found");
        assert_eq!(
            result.recommendations,
            vec!["Investigate and fix failing tests".to_string()]
        );
    }

    #[test]
    fn provider_error_becomes_error_status() {
        let provider: Arc<dyn MetricsProvider> = Arc::new(FnProvider::new(|_| {
            Err(ProviderError::Failed("benchmark runner unreachable".into()))
        }));
        let g = Gate {
            spec: spec("performance-gate", 0.8, security_criteria()),
            provider,
        };
        let result = DefaultGateEvaluator.evaluate(&g, &serde_json::Value::Null);
        assert_eq!(result.status, GateStatus::Error);
        assert_eq!(result.issues[0].kind, "evaluation_error");
        assert_eq!(result.issues[0].severity, Severity::High);
        assert_eq!(result.issues[0].message, "benchmark runner unreachable");
        assert!(result.metrics_hash.is_none());
    }

    #[test]
    fn provider_issues_are_carried() {
        let report = MetricReport::default()
            .with_metric("critical_vulnerabilities", 0.0)
            .with_issue(Issue::new("cve", Severity::Medium, "CVE-2024-1234"));
        let criteria = vec![Criterion::new("critical_vulnerabilities", CriterionOp::Eq, 0.0)];
        let result = DefaultGateEvaluator.score(&spec("security-gate", 1.0, criteria), report);
        assert_eq!(result.status, GateStatus::Passed);
        assert_eq!(result.issues.len(), 1);
        assert!(result.recommendations.is_empty());
    }

    #[test]
    fn repeated_evaluation_is_identical() {
        let report = MetricReport::default()
            .with_metric("security_score", 91.0)
            .with_metric("critical_vulnerabilities", 0.0);
        let g = gate(spec("security-gate", 0.98, security_criteria()), report);
        let a = DefaultGateEvaluator.evaluate(&g, &serde_json::Value::Null);
        let b = DefaultGateEvaluator.evaluate(&g, &serde_json::Value::Null);
        assert_eq!(a, b);
    }

    #[test]
    fn metrics_hash_is_order_independent() {
        let mut s1 = BTreeMap::new();
        s1.insert("a".to_string(), MetricValue::Number(1.0));
        s1.insert("b".to_string(), MetricValue::Bool(true));
        let mut s2 = BTreeMap::new();
        s2.insert("b".to_string(), MetricValue::Bool(true));
        s2.insert("a".to_string(), MetricValue::Number(1.0));
        assert_eq!(compute_metrics_hash(&s1), compute_metrics_hash(&s2));
    }
}
