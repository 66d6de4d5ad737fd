//! Folding per-gate results into an overall verdict.

use std::collections::BTreeMap;

use relgate_core::evaluation::{EvaluationSummary, GateResult, Interruption, Recommendation};
use relgate_core::spec::policy::PolicySpec;
use relgate_core::types::{GateStatus, OverallStatus, Priority, UnitFloat};

/// Blocking gates of the policy whose result is `failed`, in id order.
pub fn blockers(policy: &PolicySpec, gates: &BTreeMap<String, GateResult>) -> Vec<String> {
    gates
        .values()
        .filter(|g| g.status == GateStatus::Failed && policy.is_blocking(&g.gate_id))
        .map(|g| g.gate_id.clone())
        .collect()
}

pub fn summarize(gates: &BTreeMap<String, GateResult>, blockers: &[String]) -> EvaluationSummary {
    let count = |status: GateStatus| gates.values().filter(|g| g.status == status).count();
    let total = gates.len();
    let passed = count(GateStatus::Passed);
    EvaluationSummary {
        total,
        passed,
        failed: count(GateStatus::Failed),
        bypassed: count(GateStatus::Bypassed),
        blocked: blockers.len(),
        errored: count(GateStatus::Error),
        pass_rate: UnitFloat::ratio(passed, total).value(),
    }
}

/// Precedence: interruption, then blockers, then the pass ratio.
pub fn overall_status(
    summary: &EvaluationSummary,
    interruption: Option<Interruption>,
    conditional_ratio: UnitFloat,
) -> OverallStatus {
    if interruption.is_some() {
        return OverallStatus::Error;
    }
    if summary.blocked > 0 {
        return OverallStatus::Blocked;
    }
    let ok = summary.passed + summary.bypassed;
    if ok == summary.total {
        OverallStatus::Passed
    } else if UnitFloat::ratio(ok, summary.total) >= conditional_ratio {
        OverallStatus::Conditional
    } else {
        OverallStatus::Failed
    }
}

pub fn recommendations(
    gates: &BTreeMap<String, GateResult>,
    summary: &EvaluationSummary,
    blockers: &[String],
) -> Vec<Recommendation> {
    let mut out = Vec::new();

    for gate in gates.values() {
        match gate.status {
            GateStatus::Failed => out.push(Recommendation {
                gate_id: Some(gate.gate_id.clone()),
                priority: gate.priority,
                message: format!(
                    "{} failed: score {:.2} below threshold {:.2}",
                    gate.gate_name,
                    gate.score.value(),
                    gate.threshold.value()
                ),
                actions: gate.recommendations.clone(),
            }),
            GateStatus::Error => out.push(Recommendation {
                gate_id: Some(gate.gate_id.clone()),
                priority: gate.priority,
                message: format!("{} could not be evaluated", gate.gate_name),
                actions: gate.recommendations.clone(),
            }),
            GateStatus::Passed | GateStatus::Bypassed => {}
        }
    }

    if summary.blocked > 0 {
        out.push(Recommendation {
            gate_id: None,
            priority: Priority::Critical,
            message: format!(
                "Release is blocked: resolve blocking gate failures ({})",
                blockers.join(", ")
            ),
            actions: Vec::new(),
        });
    }
    if summary.failed > summary.passed {
        out.push(Recommendation {
            gate_id: None,
            priority: Priority::High,
            message: "More gates failed than passed; review overall release readiness"
                .to_string(),
            actions: Vec::new(),
        });
    }

    out
}
