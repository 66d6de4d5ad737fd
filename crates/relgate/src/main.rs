#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::time::MissedTickBehavior;

use relgate_core::spec::ReleaseConfig;
use relgate_core::types::{AuditEventType, BypassStatus, Urgency};
use relgate_engine::bypass::BypassManager;
use relgate_engine::policy::{CancelToken, PolicyEngine};
use relgate_engine::registry::Registry;
use relgate_engine::report;
use relgate_engine::state::atomic::LOCK_REFRESH_INTERVAL;
use relgate_engine::state::{StateDir, StateWriter};

#[derive(Parser)]
#[command(
    name = "rgate",
    version,
    about = "Release readiness gates, policies, and bypass approvals."
)]
struct Cli {
    /// Directory holding bypass state and the audit log.
    #[arg(long, global = true, default_value = ".relgate")]
    state_dir: PathBuf,

    /// Verbose logging to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write a config from a built-in template.
    Init {
        /// Template name: standard, minimal.
        #[arg(long, default_value = "standard")]
        template: String,

        /// Output path.
        #[arg(short, long, default_value = "relgate.json")]
        output: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// List available built-in templates.
    Templates,

    /// Schema + consistency validation of a config.
    Check {
        /// Path to config .json.
        file: String,

        /// Output structured JSON report.
        #[arg(long)]
        json: bool,

        /// Fail on warnings (not just errors).
        #[arg(long)]
        strict: bool,
    },

    /// List gates defined by a config.
    Gates {
        /// Path to config .json.
        config: String,
    },

    /// List policies defined by a config.
    Policies {
        /// Path to config .json.
        config: String,
    },

    /// Evaluate a policy against raw test results.
    Evaluate {
        /// Path to config .json.
        config: String,

        /// Policy name (e.g. deployment, staging, hotfix).
        #[arg(long)]
        policy: String,

        /// Raw results .json produced by the test pipeline.
        #[arg(long)]
        results: String,

        /// Also write the evaluation JSON to this file.
        #[arg(long)]
        out: Option<String>,

        /// Also write a Markdown report to this file.
        #[arg(long)]
        markdown: Option<String>,

        /// Override settings.evaluation_timeout_secs.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Override settings.provider_timeout_secs.
        #[arg(long)]
        provider_timeout_secs: Option<u64>,
    },

    /// Request, approve, reject or list gate bypasses.
    Bypass {
        #[command(subcommand)]
        action: BypassCmd,
    },

    /// Render a stored evaluation.
    Report {
        /// Path to evaluation .json (from `evaluate --out`).
        file: String,

        /// Output format: md, json.
        #[arg(long, default_value = "md")]
        format: String,
    },

    /// Show or verify the audit log.
    Audit {
        /// Verify the hash chain instead of printing entries.
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Subcommand)]
enum BypassCmd {
    /// Open a bypass request for a gate.
    Request {
        /// Path to config .json.
        config: String,

        #[arg(long)]
        gate: String,

        #[arg(long)]
        reason: String,

        #[arg(long)]
        requested_by: String,

        /// low, normal, high, emergency.
        #[arg(long, default_value = "normal")]
        urgency: Urgency,
    },

    /// Add an approval to a pending request.
    Approve {
        /// Path to config .json.
        config: String,

        /// Request id.
        id: String,

        #[arg(long)]
        approver: String,

        #[arg(long)]
        comments: Option<String>,
    },

    /// Reject a pending request.
    Reject {
        /// Path to config .json.
        config: String,

        /// Request id.
        id: String,

        #[arg(long)]
        by: String,

        #[arg(long)]
        reason: String,
    },

    /// List requests, oldest first.
    List {
        /// Path to config .json.
        config: String,

        /// Only requests with this status: pending, approved, rejected.
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let state_dir = cli.state_dir;

    match cli.cmd {
        Cmd::Init {
            template,
            output,
            force,
        } => cmd_init(&template, &output, force),

        Cmd::Templates => cmd_templates(),

        Cmd::Check { file, json, strict } => cmd_check(&file, json, strict),

        Cmd::Gates { config } => cmd_gates(&config),

        Cmd::Policies { config } => cmd_policies(&config),

        Cmd::Evaluate {
            config,
            policy,
            results,
            out,
            markdown,
            timeout_secs,
            provider_timeout_secs,
        } => {
            cmd_evaluate(
                &state_dir,
                &config,
                &policy,
                &results,
                out.as_deref(),
                markdown.as_deref(),
                timeout_secs,
                provider_timeout_secs,
            )
            .await
        }

        Cmd::Bypass { action } => cmd_bypass(&state_dir, action),

        Cmd::Report { file, format } => cmd_report(&file, &format),

        Cmd::Audit { verify } => cmd_audit(&state_dir, verify),
    }
}

/// Logs go to stderr; stdout carries JSON only.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

// ── Config commands ─────────────────────────────────────────────

fn cmd_init(template: &str, output: &str, force: bool) -> Result<()> {
    let config = relgate_core::templates::generate(template).ok_or_else(|| {
        let available: Vec<_> = relgate_core::templates::list_templates()
            .iter()
            .map(|(n, _)| *n)
            .collect();
        anyhow::anyhow!(
            "unknown template \"{template}\". available: {}",
            available.join(", ")
        )
    })?;
    if Path::new(output).exists() && !force {
        bail!("{output} already exists (use --force to overwrite)");
    }
    let json = serde_json::to_string_pretty(&config)?;
    std::fs::write(output, json).with_context(|| format!("cannot write {output}"))?;
    eprintln!("created {output} from template {template}");
    Ok(())
}

fn cmd_templates() -> Result<()> {
    for (name, desc) in relgate_core::templates::list_templates() {
        println!("  {name:<10} {desc}");
    }
    Ok(())
}

fn cmd_check(file: &str, json_out: bool, strict: bool) -> Result<()> {
    let content =
        std::fs::read_to_string(file).map_err(|e| anyhow::anyhow!("cannot read {file}: {e}"))?;
    let data: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("{file}: invalid JSON: {e}"))?;

    let report = relgate_core::schema::check(&data, file, strict);

    if json_out {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if report.pass {
            eprintln!("  ok  {file} (v{})", report.version);
        } else {
            eprintln!("  FAIL {file} (v{})", report.version);
        }
        for e in &report.errors {
            eprintln!(
                "  error {}: {} {}",
                e.code,
                e.message,
                e.path.as_deref().unwrap_or("")
            );
        }
        for w in &report.warnings {
            eprintln!(
                "  warn  {}: {} {}",
                w.code,
                w.message,
                w.path.as_deref().unwrap_or("")
            );
        }
    }

    if !report.pass {
        bail!("check failed for {file}");
    }
    Ok(())
}

fn load_registry(config_path: &str) -> Result<(ReleaseConfig, Arc<Registry>)> {
    let config = relgate_core::schema::load_checked(config_path)?;
    let registry =
        Registry::from_config(&config).with_context(|| format!("{config_path}: invalid registry"))?;
    Ok((config, Arc::new(registry)))
}

fn cmd_gates(config_path: &str) -> Result<()> {
    let (_, registry) = load_registry(config_path)?;
    let rows: Vec<_> = registry
        .gates()
        .map(|g| {
            json!({
                "id": g.spec.id,
                "name": g.spec.name,
                "category": g.spec.category,
                "priority": g.spec.priority,
                "required": g.spec.required,
                "blocking": g.spec.blocking,
                "threshold": g.spec.threshold,
                "criteria": g.spec.criteria.len(),
                "provider": g.provider.describe(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

fn cmd_policies(config_path: &str) -> Result<()> {
    let (_, registry) = load_registry(config_path)?;
    let policies: Vec<_> = registry.policies().collect();
    println!("{}", serde_json::to_string_pretty(&policies)?);
    Ok(())
}

// ── Evaluation ──────────────────────────────────────────────────

/// Load config and persisted bypasses, expiring stale pending requests.
fn open_bypasses(
    config_path: &str,
    writer: &StateWriter<'_>,
) -> Result<(ReleaseConfig, Arc<Registry>, Arc<BypassManager>)> {
    let (config, registry) = load_registry(config_path)?;
    let bypasses = Arc::new(BypassManager::new(
        Arc::clone(&registry),
        config.settings.bypass_ttl(),
    ));
    let persisted = writer.load_bypasses()?;
    tracing::debug!(requests = persisted.len(), "loaded bypass state");
    bypasses.restore(persisted);

    let expired = bypasses.expire_stale(chrono::Utc::now());
    if !expired.is_empty() {
        for id in &expired {
            writer.audit(
                AuditEventType::BypassExpired,
                &json!({ "request_id": id, "by": "system", "reason": "expired" }),
            )?;
            eprintln!("  expired bypass {id}");
        }
        writer.save_bypasses(&bypasses.snapshot())?;
    }
    Ok((config, registry, bypasses))
}

#[allow(clippy::too_many_arguments)]
async fn cmd_evaluate(
    state_dir: &Path,
    config_path: &str,
    policy: &str,
    results_path: &str,
    out: Option<&str>,
    markdown: Option<&str>,
    timeout_secs: Option<u64>,
    provider_timeout_secs: Option<u64>,
) -> Result<()> {
    let state = StateDir::open(state_dir)?;
    let writer = state.lock()?;
    let (config, registry, bypasses) = open_bypasses(config_path, &writer)?;
    let mut engine = PolicyEngine::new(registry, Arc::clone(&bypasses), &config.settings);

    let results: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(results_path)
            .with_context(|| format!("cannot read results {results_path}"))?,
    )
    .with_context(|| format!("{results_path}: invalid JSON"))?;

    if let Some(secs) = timeout_secs {
        engine = engine.with_evaluation_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = provider_timeout_secs {
        engine = engine.with_provider_timeout(Duration::from_secs(secs));
    }

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("  interrupt received, cancelling evaluation");
            on_interrupt.cancel();
        }
    });

    let evaluation = {
        let run = engine.evaluate_with_cancel(policy, Arc::new(results), &cancel);
        tokio::pin!(run);
        let mut heartbeat = tokio::time::interval(LOCK_REFRESH_INTERVAL);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                outcome = &mut run => break outcome?,
                _ = heartbeat.tick() => writer.refresh_lock()?,
            }
        }
    };

    let consumed: Vec<_> = evaluation
        .gates
        .iter()
        .filter_map(|(gate, g)| g.bypass_id.as_deref().map(|id| (gate, id)))
        .collect();
    if !consumed.is_empty() {
        for (gate, id) in &consumed {
            writer.audit(
                AuditEventType::BypassConsumed,
                &json!({
                    "request_id": id,
                    "gate_id": gate,
                    "evaluation_id": evaluation.evaluation_id,
                }),
            )?;
        }
        writer.save_bypasses(&bypasses.snapshot())?;
    }

    let json = report::to_json(&evaluation)?;
    println!("{json}");
    if let Some(path) = out {
        report::write_artifact(Path::new(path), &json)?;
        eprintln!("wrote {path}");
    }
    if let Some(path) = markdown {
        report::write_artifact(Path::new(path), &report::to_markdown(&evaluation))?;
        eprintln!("wrote {path}");
    }

    writer.audit(
        AuditEventType::EvaluationCompleted,
        &json!({
            "evaluation_id": evaluation.evaluation_id,
            "policy": evaluation.policy_name,
            "overall_status": evaluation.overall_status,
            "blockers": evaluation.blockers,
            "summary": evaluation.summary,
        }),
    )?;

    let s = &evaluation.summary;
    eprintln!(
        "  {}: {} ({} passed, {} failed, {} bypassed, {} errored of {})",
        evaluation.policy_name,
        evaluation.overall_status,
        s.passed,
        s.failed,
        s.bypassed,
        s.errored,
        s.total
    );
    if !evaluation.overall_status.is_deployable() {
        bail!(
            "policy '{}' is {}: release not ready",
            evaluation.policy_name,
            evaluation.overall_status
        );
    }
    Ok(())
}

// ── Bypass ──────────────────────────────────────────────────────

fn cmd_bypass(state_dir: &Path, action: BypassCmd) -> Result<()> {
    let state = StateDir::open(state_dir)?;
    let writer = state.lock()?;

    match action {
        BypassCmd::Request {
            config,
            gate,
            reason,
            requested_by,
            urgency,
        } => {
            let (_, _, bypasses) = open_bypasses(&config, &writer)?;
            let request = bypasses.request_bypass(&gate, &reason, &requested_by, urgency)?;
            writer.audit(
                AuditEventType::BypassRequested,
                &json!({
                    "request_id": request.id,
                    "gate_id": request.gate_id,
                    "requested_by": request.requested_by,
                    "reason": request.reason,
                    "urgency": request.urgency,
                    "required_approvals": request.required_approvals,
                }),
            )?;
            writer.save_bypasses(&bypasses.snapshot())?;
            eprintln!(
                "  requested bypass {} for {} ({} approval(s) required)",
                request.id, request.gate_id, request.required_approvals
            );
            println!("{}", serde_json::to_string_pretty(&request)?);
        }

        BypassCmd::Approve {
            config,
            id,
            approver,
            comments,
        } => {
            let (_, _, bypasses) = open_bypasses(&config, &writer)?;
            let request = bypasses.approve_bypass(&id, &approver, comments.as_deref())?;
            writer.audit(
                AuditEventType::BypassApproved,
                &json!({
                    "request_id": request.id,
                    "gate_id": request.gate_id,
                    "approver": approver,
                    "approvals": request.approval_count(),
                    "required_approvals": request.required_approvals,
                    "status": request.status,
                }),
            )?;
            writer.save_bypasses(&bypasses.snapshot())?;
            eprintln!(
                "  {} approval {}/{} for {} ({})",
                approver,
                request.approval_count(),
                request.required_approvals,
                request.id,
                request.status
            );
            println!("{}", serde_json::to_string_pretty(&request)?);
        }

        BypassCmd::Reject {
            config,
            id,
            by,
            reason,
        } => {
            let (_, _, bypasses) = open_bypasses(&config, &writer)?;
            let request = bypasses.reject_bypass(&id, &by, &reason)?;
            writer.audit(
                AuditEventType::BypassRejected,
                &json!({
                    "request_id": request.id,
                    "gate_id": request.gate_id,
                    "by": by,
                    "reason": reason,
                }),
            )?;
            writer.save_bypasses(&bypasses.snapshot())?;
            eprintln!("  rejected bypass {} (by {by})", request.id);
            println!("{}", serde_json::to_string_pretty(&request)?);
        }

        BypassCmd::List { config, status } => {
            let filter = status.as_deref().map(parse_status).transpose()?;
            let (_, _, bypasses) = open_bypasses(&config, &writer)?;
            println!("{}", serde_json::to_string_pretty(&bypasses.list(filter))?);
        }
    }
    Ok(())
}

fn parse_status(s: &str) -> Result<BypassStatus> {
    serde_json::from_value(json!(s))
        .map_err(|_| anyhow::anyhow!("unknown status '{s}' (expected pending, approved, rejected)"))
}

// ── Report & audit ──────────────────────────────────────────────

fn cmd_report(file: &str, format: &str) -> Result<()> {
    let evaluation = report::load(Path::new(file))?;
    match format {
        "md" | "markdown" => print!("{}", report::to_markdown(&evaluation)),
        "json" => println!("{}", report::to_json(&evaluation)?),
        other => bail!("unknown format '{other}' (expected md, json)"),
    }
    Ok(())
}

fn cmd_audit(state_dir: &Path, verify: bool) -> Result<()> {
    let audit_path = StateDir::open(state_dir)?.audit_path();
    if !audit_path.exists() {
        eprintln!("  no audit log found at {}", audit_path.display());
        return Ok(());
    }
    if verify {
        let count = relgate_engine::state::audit_log::verify_chain(&audit_path)?;
        eprintln!("  audit chain valid ({count} entries)");
        println!("{}", json!({ "valid": true, "entries": count }));
    } else {
        let entries = relgate_engine::state::audit_log::read_entries(&audit_path)?;
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    Ok(())
}
