//! Rendering an [`Evaluation`] as a JSON artifact or a Markdown summary.

use std::path::Path;

use anyhow::{Context, Result};

use relgate_core::evaluation::{Evaluation, GateResult};

use crate::state::atomic::atomic_write;

/// Pretty JSON, the canonical artifact format.
pub fn to_json(evaluation: &Evaluation) -> Result<String> {
    serde_json::to_string_pretty(evaluation).context("serialize evaluation")
}

/// Load a previously written evaluation artifact.
pub fn load(path: &Path) -> Result<Evaluation> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{}: invalid evaluation", path.display()))
}

/// Write a rendered report atomically.
pub fn write_artifact(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

pub fn to_markdown(evaluation: &Evaluation) -> String {
    let mut out = String::with_capacity(2048);
    emit_header(&mut out, evaluation);
    emit_gate_table(&mut out, evaluation);
    for gate in evaluation.gates.values() {
        emit_gate(&mut out, gate);
    }
    emit_recommendations(&mut out, evaluation);
    out
}

// ── Section emitters ────────────────────────────────────────────

fn emit_header(out: &mut String, e: &Evaluation) {
    out.push_str(&format!("# Release readiness: {}\n\n", e.policy_name));
    out.push_str(&format!(
        "**Overall status:** {}\n",
        e.overall_status.to_string().to_uppercase()
    ));
    out.push_str(&format!("**Evaluation:** {}\n", e.evaluation_id));
    out.push_str(&format!(
        "**Completed:** {} ({} ms)\n",
        e.completed_at.to_rfc3339(),
        e.duration_ms
    ));
    if let Some(reason) = e.interruption {
        out.push_str(&format!("**Interrupted:** {reason:?}\n"));
    }
    let s = &e.summary;
    out.push_str(&format!(
        "**Gates:** {} total, {} passed, {} failed, {} bypassed, {} errored (pass rate {:.0}%)\n",
        s.total,
        s.passed,
        s.failed,
        s.bypassed,
        s.errored,
        s.pass_rate * 100.0
    ));
    if !e.blockers.is_empty() {
        out.push_str(&format!("**Blockers:** {}\n", e.blockers.join(", ")));
    }
    out.push('\n');
}

fn emit_gate_table(out: &mut String, e: &Evaluation) {
    out.push_str("## Gates\n\n");
    out.push_str("| Gate | Priority | Status | Score | Threshold |\n");
    out.push_str("|---|---|---|---|---|\n");
    for g in e.gates.values() {
        let marker = if e.blockers.contains(&g.gate_id) {
            " (blocking)"
        } else {
            ""
        };
        out.push_str(&format!(
            "| {} | {} | {}{marker} | {:.2} | {:.2} |\n",
            g.gate_name,
            g.priority,
            g.status,
            g.score.value(),
            g.threshold.value()
        ));
    }
    out.push('\n');
}

fn emit_gate(out: &mut String, g: &GateResult) {
    if g.criteria.is_empty() && g.issues.is_empty() {
        return;
    }
    out.push_str(&format!("### {} ({})\n\n", g.gate_name, g.status));
    for c in &g.criteria {
        let mark = if c.passed { "x" } else { " " };
        out.push_str(&format!("- [{mark}] `{}`: {}\n", c.metric, c.message));
    }
    if !g.issues.is_empty() {
        if !g.criteria.is_empty() {
            out.push('\n');
        }
        out.push_str("**Issues:**\n");
        for issue in &g.issues {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                issue.severity, issue.kind, issue.message
            ));
        }
    }
    out.push('\n');
}

fn emit_recommendations(out: &mut String, e: &Evaluation) {
    if e.recommendations.is_empty() {
        return;
    }
    out.push_str("## Recommendations\n\n");
    for r in &e.recommendations {
        out.push_str(&format!("- **{}** {}\n", r.priority, r.message));
        for action in &r.actions {
            out.push_str(&format!("  - {action}\n"));
        }
    }
}
