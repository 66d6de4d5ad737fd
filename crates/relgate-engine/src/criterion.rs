use std::collections::BTreeMap;

use relgate_core::evaluation::CriterionResult;
use relgate_core::spec::gates::Criterion;
use relgate_core::types::{CriterionOp, MetricValue};

/// Apply one criterion to a metrics snapshot.
///
/// A missing metric or a type mismatch is a failed criterion, never an error.
pub fn evaluate(criterion: &Criterion, metrics: &BTreeMap<String, MetricValue>) -> CriterionResult {
    let actual = metrics.get(&criterion.metric).copied();

    let (passed, message) = match actual {
        None => (false, "metric not found".to_string()),
        Some(actual) => compare(criterion.operator, &actual, &criterion.expected),
    };

    CriterionResult {
        metric: criterion.metric.clone(),
        operator: criterion.operator,
        expected: criterion.expected,
        actual,
        passed,
        message,
    }
}

fn compare(op: CriterionOp, actual: &MetricValue, expected: &MetricValue) -> (bool, String) {
    match (actual, expected) {
        (MetricValue::Number(a), MetricValue::Number(e)) => compare_numbers(op, *a, *e),
        (MetricValue::Bool(a), MetricValue::Bool(e)) => {
            if op.is_ordering() {
                return (
                    false,
                    format!("type mismatch: operator {op} cannot be applied to booleans"),
                );
            }
            let passed = match op {
                CriterionOp::Eq => a == e,
                _ => a != e,
            };
            (passed, outcome(passed, actual, op, expected))
        }
        _ => (
            false,
            format!(
                "type mismatch: measured {} {actual} cannot be compared with expected {} {expected}",
                actual.kind(),
                expected.kind()
            ),
        ),
    }
}

fn compare_numbers(op: CriterionOp, a: f64, e: f64) -> (bool, String) {
    if !a.is_finite() {
        return (false, format!("measured value {a} is not a finite number"));
    }
    let passed = match op {
        CriterionOp::Eq => a == e,
        CriterionOp::Neq => a != e,
        CriterionOp::Gt => a > e,
        CriterionOp::Gte => a >= e,
        CriterionOp::Lt => a < e,
        CriterionOp::Lte => a <= e,
    };
    (
        passed,
        outcome(passed, &MetricValue::Number(a), op, &MetricValue::Number(e)),
    )
}

fn outcome(passed: bool, actual: &MetricValue, op: CriterionOp, expected: &MetricValue) -> String {
    if passed {
        format!("{actual} {op} {expected}")
    } else {
        format!("expected {op} {expected}, measured {actual}")
    }
}
