use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use relgate_core::bypass::BypassRequest;
use relgate_core::errors::EngineError;
use relgate_core::evaluation::{Evaluation, GateResult, Interruption};
use relgate_core::spec::policy::PolicySpec;
use relgate_core::spec::Settings;
use relgate_core::types::UnitFloat;

use super::aggregate;
use super::cancel::CancelToken;
use crate::bypass::BypassManager;
use crate::gates::evaluator::DefaultGateEvaluator;
use crate::registry::{Gate, Registry};

/// Runs a policy's required gates concurrently and folds them into one verdict.
///
/// Gate tasks are bounded by a semaphore; each provider call runs on the
/// blocking pool under its own timeout, and the whole evaluation under a
/// deadline. A gate that does not finish is recorded as `error`.
pub struct PolicyEngine {
    registry: Arc<Registry>,
    bypasses: Arc<BypassManager>,
    evaluation_timeout: Duration,
    provider_timeout: Duration,
    max_concurrent_gates: usize,
    conditional_ratio: UnitFloat,
}

impl PolicyEngine {
    pub fn new(registry: Arc<Registry>, bypasses: Arc<BypassManager>, settings: &Settings) -> Self {
        Self {
            registry,
            bypasses,
            evaluation_timeout: settings.evaluation_timeout(),
            provider_timeout: settings.provider_timeout(),
            max_concurrent_gates: settings.max_concurrent_gates.max(1),
            conditional_ratio: settings.conditional_ratio,
        }
    }

    pub fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Per-gate provider limit. A provider that overruns it is recorded as
    /// `error` at once, but its thread keeps the gate's concurrency slot until
    /// it returns.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub async fn evaluate(
        &self,
        policy_name: &str,
        results: Arc<Value>,
    ) -> Result<Evaluation, EngineError> {
        self.evaluate_with_cancel(policy_name, results, &CancelToken::new())
            .await
    }

    #[instrument(skip_all, fields(policy = %policy_name))]
    pub async fn evaluate_with_cancel(
        &self,
        policy_name: &str,
        results: Arc<Value>,
        cancel: &CancelToken,
    ) -> Result<Evaluation, EngineError> {
        let policy = self
            .registry
            .policy(policy_name)
            .ok_or_else(|| EngineError::UnknownPolicy(policy_name.to_string()))?;
        let evaluation_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut gates: BTreeMap<String, GateResult> = BTreeMap::new();
        let mut pending: Vec<Gate> = Vec::new();
        for gate_id in &policy.required_gates {
            let Some(gate) = self.registry.gate(gate_id) else {
                continue;
            };
            match self.claim_bypass(policy, gate_id, &evaluation_id) {
                Some(bypass) => {
                    debug!(gate = %gate_id, request_id = %bypass.id, "gate bypassed");
                    gates.insert(
                        gate_id.clone(),
                        GateResult::bypassed(&gate.spec, &bypass.id, &bypass.reason),
                    );
                }
                None => pending.push(gate.clone()),
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_gates));
        let mut tasks = JoinSet::new();
        for gate in &pending {
            let gate = gate.clone();
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let limit = self.provider_timeout;
            tasks.spawn(async move {
                let permit = semaphore.acquire_owned().await.ok();
                let result = run_gate(&gate, results, limit, permit).await;
                (gate.spec.id, result)
            });
        }

        let mut interruption = None;
        let deadline = tokio::time::sleep(self.evaluation_timeout);
        tokio::pin!(deadline);
        while !tasks.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interruption = Some(Interruption::Cancelled);
                    break;
                }
                _ = &mut deadline => {
                    interruption = Some(Interruption::Timeout);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((gate_id, result))) => {
                        gates.insert(gate_id, result);
                    }
                    Some(Err(e)) => warn!(error = %e, "gate task did not complete"),
                    None => break,
                },
            }
        }
        tasks.abort_all();

        let mut unfinished = 0;
        for gate in &pending {
            if gates.contains_key(&gate.spec.id) {
                continue;
            }
            unfinished += 1;
            let result = match interruption {
                Some(Interruption::Timeout) => {
                    GateResult::error(&gate.spec, "timeout", "evaluation timeout")
                }
                Some(Interruption::Cancelled) => {
                    GateResult::error(&gate.spec, "cancelled", "evaluation cancelled")
                }
                None => GateResult::error(
                    &gate.spec,
                    "evaluation_error",
                    "gate evaluation task aborted",
                ),
            };
            gates.insert(gate.spec.id.clone(), result);
        }
        if let Some(reason) = interruption {
            warn!(?reason, unfinished, "evaluation interrupted");
        }

        let blockers = aggregate::blockers(policy, &gates);
        let summary = aggregate::summarize(&gates, &blockers);
        let overall_status =
            aggregate::overall_status(&summary, interruption, self.conditional_ratio);
        let recommendations = aggregate::recommendations(&gates, &summary, &blockers);

        info!(
            %overall_status,
            passed = summary.passed,
            failed = summary.failed,
            bypassed = summary.bypassed,
            errored = summary.errored,
            blocked = summary.blocked,
            "policy evaluated"
        );

        Ok(Evaluation {
            evaluation_id,
            policy_name: policy.name.clone(),
            overall_status,
            gates,
            summary,
            blockers,
            recommendations,
            interruption,
            started_at,
            completed_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
        })
    }

    /// Spend an approved bypass that satisfies the policy, if any.
    fn claim_bypass(
        &self,
        policy: &PolicySpec,
        gate_id: &str,
        evaluation_id: &str,
    ) -> Option<BypassRequest> {
        if !policy.allow_bypass {
            return None;
        }
        let min_approvals = if policy.approval_required {
            policy.minimum_approvers
        } else {
            0
        };
        self.bypasses
            .claim_bypass(gate_id, evaluation_id, min_approvals)
    }
}

/// Collect on the blocking pool under `limit`, then score.
///
/// The concurrency permit travels with the blocking call, so a provider that
/// outlives its timeout keeps its slot until its thread returns.
async fn run_gate(
    gate: &Gate,
    results: Arc<Value>,
    limit: Duration,
    permit: Option<OwnedSemaphorePermit>,
) -> GateResult {
    let provider = Arc::clone(&gate.provider);
    let collect = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        provider.collect(&results)
    });

    match tokio::time::timeout(limit, collect).await {
        Ok(Ok(outcome)) => DefaultGateEvaluator.finish(&gate.spec, outcome),
        Ok(Err(e)) => {
            warn!(gate = %gate.spec.id, error = %e, "metrics provider panicked");
            GateResult::error(
                &gate.spec,
                "evaluation_error",
                format!("metrics provider panicked: {e}"),
            )
        }
        Err(_) => {
            warn!(
                gate = %gate.spec.id,
                timeout_secs = limit.as_secs_f64(),
                "metrics provider timed out"
            );
            GateResult::error(
                &gate.spec,
                "timeout",
                format!("metrics provider timed out after {}s", format_secs(limit)),
            )
        }
    }
}

fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        format!("{:.1}", d.as_secs_f64())
    }
}
