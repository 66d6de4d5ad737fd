use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use relgate_core::bypass::{Approval, BypassRequest, Rejection};
use relgate_core::errors::BypassError;
use relgate_core::types::{BypassStatus, Urgency};

use crate::registry::Registry;

/// Tracks bypass requests and accumulates approvals to quorum.
///
/// Every mutation of a request happens under that request's map entry guard,
/// so append-approval-then-check-quorum is a single critical section and the
/// pending -> approved transition fires exactly once.
pub struct BypassManager {
    registry: Arc<Registry>,
    requests: DashMap<String, BypassRequest>,
    ttl: Duration,
}

impl BypassManager {
    pub fn new(registry: Arc<Registry>, ttl: Duration) -> Self {
        Self {
            registry,
            requests: DashMap::new(),
            ttl,
        }
    }

    pub fn request_bypass(
        &self,
        gate_id: &str,
        reason: &str,
        requested_by: &str,
        urgency: Urgency,
    ) -> Result<BypassRequest, BypassError> {
        let gate = self
            .registry
            .gate(gate_id)
            .ok_or_else(|| BypassError::GateNotFound(gate_id.to_string()))?;
        if reason.trim().is_empty() {
            return Err(BypassError::InvalidRequest("reason must not be empty".into()));
        }
        if requested_by.trim().is_empty() {
            return Err(BypassError::InvalidRequest(
                "requested_by must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let request = BypassRequest {
            id: uuid::Uuid::new_v4().to_string(),
            gate_id: gate_id.to_string(),
            reason: reason.to_string(),
            requested_by: requested_by.to_string(),
            urgency,
            required_approvals: BypassRequest::approvals_for(gate.spec.priority),
            approvals: Vec::new(),
            status: BypassStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
            resolved_at: None,
            rejection: None,
            consumed_by: None,
            consumed_at: None,
        };

        info!(
            request_id = %request.id,
            gate = %gate_id,
            requested_by,
            required_approvals = request.required_approvals,
            "bypass requested"
        );
        self.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    pub fn approve_bypass(
        &self,
        request_id: &str,
        approved_by: &str,
        comments: Option<&str>,
    ) -> Result<BypassRequest, BypassError> {
        if approved_by.trim().is_empty() {
            return Err(BypassError::InvalidRequest("approver must not be empty".into()));
        }

        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| BypassError::RequestNotFound(request_id.to_string()))?;
        let request = entry.value_mut();
        let now = Utc::now();

        if request.is_pending_past(now) {
            expire(request, now);
        }
        if request.status != BypassStatus::Pending {
            return Err(BypassError::InvalidState {
                id: request.id.clone(),
                status: request.status,
            });
        }
        if request.has_approved(approved_by) {
            warn!(request_id, approver = approved_by, "duplicate bypass approval rejected");
            return Err(BypassError::DuplicateApprover {
                id: request.id.clone(),
                approver: approved_by.to_string(),
            });
        }

        request.approvals.push(Approval {
            approver: approved_by.to_string(),
            comments: comments.map(str::to_string),
            timestamp: now,
        });

        if request.approval_count() >= request.required_approvals {
            request.status = BypassStatus::Approved;
            request.resolved_at = Some(now);
            info!(
                request_id,
                gate = %request.gate_id,
                approvals = request.approval_count(),
                "bypass approved"
            );
        } else {
            info!(
                request_id,
                approver = approved_by,
                approvals = request.approval_count(),
                required = request.required_approvals,
                "bypass approval recorded"
            );
        }

        Ok(request.clone())
    }

    pub fn reject_bypass(
        &self,
        request_id: &str,
        rejected_by: &str,
        reason: &str,
    ) -> Result<BypassRequest, BypassError> {
        let mut entry = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| BypassError::RequestNotFound(request_id.to_string()))?;
        let request = entry.value_mut();
        if request.status != BypassStatus::Pending {
            return Err(BypassError::InvalidState {
                id: request.id.clone(),
                status: request.status,
            });
        }

        request.status = BypassStatus::Rejected;
        request.resolved_at = Some(Utc::now());
        request.rejection = Some(Rejection {
            by: rejected_by.to_string(),
            reason: reason.to_string(),
        });
        info!(request_id, rejected_by, "bypass rejected");
        Ok(request.clone())
    }

    /// Most recently approved bypass for a gate that no evaluation has spent.
    pub fn find_approved_bypass(&self, gate_id: &str) -> Option<BypassRequest> {
        self.available_for(gate_id)
            .into_iter()
            .next()
            .and_then(|id| self.get(&id))
    }

    /// Spend an approved bypass on one evaluation.
    ///
    /// Picks the most recently approved unspent request for the gate that
    /// carries at least `min_approvals` approvals and marks it consumed by
    /// `evaluation_id` under its entry guard, so concurrent evaluations
    /// cannot both apply the same request.
    pub fn claim_bypass(
        &self,
        gate_id: &str,
        evaluation_id: &str,
        min_approvals: u32,
    ) -> Option<BypassRequest> {
        for id in self.available_for(gate_id) {
            let Some(mut entry) = self.requests.get_mut(&id) else {
                continue;
            };
            let request = entry.value_mut();
            if !request.is_available() {
                continue;
            }
            if request.approval_count() < min_approvals {
                debug!(
                    request_id = %request.id,
                    gate = %gate_id,
                    approvals = request.approval_count(),
                    minimum = min_approvals,
                    "approved bypass lacks policy quorum"
                );
                continue;
            }
            request.consumed_by = Some(evaluation_id.to_string());
            request.consumed_at = Some(Utc::now());
            info!(request_id = %request.id, gate = %gate_id, evaluation_id, "bypass consumed");
            return Some(request.clone());
        }
        None
    }

    /// Ids of unspent approved requests for a gate, newest approval first.
    fn available_for(&self, gate_id: &str) -> Vec<String> {
        let mut found: Vec<_> = self
            .requests
            .iter()
            .filter(|r| r.gate_id == gate_id && r.is_available())
            .map(|r| (r.resolved_at, r.id.clone()))
            .collect();
        found.sort_by(|a, b| b.cmp(a));
        found.into_iter().map(|(_, id)| id).collect()
    }

    pub fn get(&self, request_id: &str) -> Option<BypassRequest> {
        self.requests.get(request_id).map(|r| r.value().clone())
    }

    /// Requests ordered by creation time, optionally filtered by status.
    pub fn list(&self, status: Option<BypassStatus>) -> Vec<BypassRequest> {
        let mut out: Vec<BypassRequest> = self
            .requests
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Auto-reject pending requests whose deadline passed. Returns their ids.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        for mut entry in self.requests.iter_mut() {
            let request = entry.value_mut();
            if request.is_pending_past(now) {
                expire(request, now);
                expired.push(request.id.clone());
            }
        }
        expired.sort();
        expired
    }

    /// All requests, for persistence.
    pub fn snapshot(&self) -> Vec<BypassRequest> {
        self.list(None)
    }

    /// Reload persisted requests, replacing any with the same id.
    pub fn restore(&self, requests: Vec<BypassRequest>) {
        for request in requests {
            self.requests.insert(request.id.clone(), request);
        }
    }
}

fn expire(request: &mut BypassRequest, now: DateTime<Utc>) {
    warn!(request_id = %request.id, gate = %request.gate_id, "pending bypass expired");
    request.status = BypassStatus::Rejected;
    request.resolved_at = Some(now);
    request.rejection = Some(Rejection {
        by: "system".to_string(),
        reason: "expired".to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use relgate_core::spec::gates::GateSpec;
    use relgate_core::traits::{MetricReport, MetricsProvider};
    use relgate_core::types::{Priority, UnitFloat};

    use crate::providers::FnProvider;

    fn registry() -> Arc<Registry> {
        let provider: Arc<dyn MetricsProvider> =
            Arc::new(FnProvider::new(|_| Ok(MetricReport::default())));
        let gate = |id: &str, priority| GateSpec {
            id: id.into(),
            name: id.into(),
            category: "test".into(),
            priority,
            required: true,
            blocking: false,
            threshold: UnitFloat::ONE,
            criteria: vec![],
            provider: None,
            description: None,
        };
        Arc::new(
            Registry::builder()
                .register_gate(gate("security-gate", Priority::Critical), provider.clone())
                .register_gate(gate("quality-gate", Priority::Medium), provider)
                .build()
                .unwrap(),
        )
    }

    fn manager() -> BypassManager {
        BypassManager::new(registry(), Duration::hours(24))
    }

    #[test]
    fn unknown_gate_rejected() {
        let err = manager()
            .request_bypass("ghost", "why", "alice", Urgency::High)
            .unwrap_err();
        assert_eq!(err, BypassError::GateNotFound("ghost".into()));
    }

    #[test]
    fn required_approvals_follow_priority() {
        let m = manager();
        let critical = m
            .request_bypass("security-gate", "false positive", "alice", Urgency::High)
            .unwrap();
        let medium = m
            .request_bypass("quality-gate", "legacy module", "alice", Urgency::Low)
            .unwrap();
        assert_eq!(critical.required_approvals, 2);
        assert_eq!(medium.required_approvals, 1);
        assert_eq!(critical.status, BypassStatus::Pending);
    }

    #[test]
    fn critical_gate_approved_on_second_distinct_approver() {
        let m = manager();
        let req = m
            .request_bypass("security-gate", "false positive", "alice", Urgency::High)
            .unwrap();

        let first = m.approve_bypass(&req.id, "bob", Some("checked")).unwrap();
        assert_eq!(first.status, BypassStatus::Pending);
        assert!(m.find_approved_bypass("security-gate").is_none());

        let second = m.approve_bypass(&req.id, "carol", None).unwrap();
        assert_eq!(second.status, BypassStatus::Approved);
        assert_eq!(second.approvals.len(), 2);
        assert!(second.resolved_at.is_some());
        assert_eq!(m.find_approved_bypass("security-gate").unwrap().id, req.id);
    }

    #[test]
    fn duplicate_approver_rejected_and_count_unchanged() {
        let m = manager();
        let req = m
            .request_bypass("security-gate", "false positive", "alice", Urgency::High)
            .unwrap();
        m.approve_bypass(&req.id, "bob", None).unwrap();
        let err = m.approve_bypass(&req.id, "bob", None).unwrap_err();
        assert!(matches!(err, BypassError::DuplicateApprover { ref approver, .. } if approver == "bob"));
        let current = m.get(&req.id).unwrap();
        assert_eq!(current.approvals.len(), 1);
        assert_eq!(current.status, BypassStatus::Pending);
    }

    #[test]
    fn approved_request_is_immutable() {
        let m = manager();
        let req = m
            .request_bypass("quality-gate", "legacy module", "alice", Urgency::Normal)
            .unwrap();
        m.approve_bypass(&req.id, "bob", None).unwrap();
        let err = m.approve_bypass(&req.id, "carol", None).unwrap_err();
        assert!(matches!(
            err,
            BypassError::InvalidState {
                status: BypassStatus::Approved,
                ..
            }
        ));
        let err = m.reject_bypass(&req.id, "dave", "changed mind").unwrap_err();
        assert!(matches!(err, BypassError::InvalidState { .. }));
        assert_eq!(m.get(&req.id).unwrap().approvals.len(), 1);
    }

    #[test]
    fn unknown_request_not_found() {
        let err = manager().approve_bypass("nope", "bob", None).unwrap_err();
        assert_eq!(err, BypassError::RequestNotFound("nope".into()));
    }

    #[test]
    fn rejected_request_cannot_be_approved() {
        let m = manager();
        let req = m
            .request_bypass("quality-gate", "legacy", "alice", Urgency::Normal)
            .unwrap();
        let rejected = m.reject_bypass(&req.id, "lead", "fix it instead").unwrap();
        assert_eq!(rejected.status, BypassStatus::Rejected);
        assert_eq!(rejected.rejection.unwrap().by, "lead");
        assert!(m.approve_bypass(&req.id, "bob", None).is_err());
    }

    #[test]
    fn expired_pending_requests_are_auto_rejected() {
        let m = manager();
        let req = m
            .request_bypass("security-gate", "false positive", "alice", Urgency::High)
            .unwrap();
        m.approve_bypass(&req.id, "bob", None).unwrap();

        let expired = m.expire_stale(Utc::now() + Duration::hours(25));
        assert_eq!(expired, vec![req.id.clone()]);
        let current = m.get(&req.id).unwrap();
        assert_eq!(current.status, BypassStatus::Rejected);
        assert_eq!(current.rejection.unwrap().reason, "expired");
        assert!(m.approve_bypass(&req.id, "carol", None).is_err());
    }

    #[test]
    fn approve_after_deadline_fails() {
        let m = manager();
        let mut req = m
            .request_bypass("quality-gate", "legacy", "alice", Urgency::Normal)
            .unwrap();
        req.expires_at = Utc::now() - Duration::minutes(1);
        m.restore(vec![req.clone()]);
        let err = m.approve_bypass(&req.id, "bob", None).unwrap_err();
        assert!(matches!(
            err,
            BypassError::InvalidState {
                status: BypassStatus::Rejected,
                ..
            }
        ));
    }

    #[test]
    fn list_filters_by_status() {
        let m = manager();
        let a = m
            .request_bypass("quality-gate", "a", "alice", Urgency::Normal)
            .unwrap();
        m.request_bypass("security-gate", "b", "alice", Urgency::Normal)
            .unwrap();
        m.approve_bypass(&a.id, "bob", None).unwrap();
        assert_eq!(m.list(None).len(), 2);
        assert_eq!(m.list(Some(BypassStatus::Pending)).len(), 1);
        assert_eq!(m.list(Some(BypassStatus::Approved))[0].id, a.id);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let m = manager();
        let req = m
            .request_bypass("security-gate", "fp", "alice", Urgency::High)
            .unwrap();
        m.approve_bypass(&req.id, "bob", None).unwrap();

        let other = manager();
        other.restore(m.snapshot());
        let restored = other.get(&req.id).unwrap();
        assert_eq!(restored.approvals.len(), 1);
        other.approve_bypass(&req.id, "carol", None).unwrap();
        assert!(other.find_approved_bypass("security-gate").is_some());
    }

    #[test]
    fn concurrent_quorum_transition_fires_once() {
        for _ in 0..20 {
            let m = Arc::new(manager());
            let req = m
                .request_bypass("security-gate", "fp", "alice", Urgency::Emergency)
                .unwrap();
            m.approve_bypass(&req.id, "bob", None).unwrap();

            // Two approvers that would each satisfy the quorum race.
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = ["carol", "dave"]
                .into_iter()
                .map(|approver| {
                    let m = Arc::clone(&m);
                    let b = Arc::clone(&barrier);
                    let id = req.id.clone();
                    thread::spawn(move || {
                        b.wait();
                        m.approve_bypass(&id, approver, None)
                    })
                })
                .collect();
            let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let approvals = outcomes
                .iter()
                .filter(|o| matches!(o, Ok(r) if r.status == BypassStatus::Approved))
                .count();
            let rejected = outcomes
                .iter()
                .filter(|o| matches!(o, Err(BypassError::InvalidState { .. })))
                .count();
            assert_eq!(approvals, 1);
            assert_eq!(rejected, 1);

            let current = m.get(&req.id).unwrap();
            assert_eq!(current.status, BypassStatus::Approved);
            assert_eq!(current.approvals.len(), 2);
        }
    }

    fn approved(m: &BypassManager, gate: &str, approvers: &[&str]) -> BypassRequest {
        let req = m
            .request_bypass(gate, "false positive", "alice", Urgency::High)
            .unwrap();
        let mut current = req;
        for approver in approvers {
            current = m.approve_bypass(&current.id, approver, None).unwrap();
        }
        assert_eq!(current.status, BypassStatus::Approved);
        current
    }

    #[test]
    fn bypass_is_spent_by_one_evaluation() {
        let m = manager();
        let req = approved(&m, "security-gate", &["bob", "carol"]);

        let claimed = m.claim_bypass("security-gate", "eval-1", 0).unwrap();
        assert_eq!(claimed.id, req.id);
        assert_eq!(claimed.consumed_by.as_deref(), Some("eval-1"));
        assert!(claimed.consumed_at.is_some());

        assert!(m.claim_bypass("security-gate", "eval-2", 0).is_none());
        assert!(m.find_approved_bypass("security-gate").is_none());
        let stored = m.get(&req.id).unwrap();
        assert_eq!(stored.status, BypassStatus::Approved);
        assert_eq!(stored.consumed_by.as_deref(), Some("eval-1"));
    }

    #[test]
    fn claim_skips_requests_below_policy_quorum() {
        let m = manager();
        let req = approved(&m, "quality-gate", &["bob"]);
        assert!(m.claim_bypass("quality-gate", "eval-1", 2).is_none());
        assert!(m.get(&req.id).unwrap().is_available());
        assert!(m.claim_bypass("quality-gate", "eval-2", 1).is_some());
    }

    #[test]
    fn each_approved_request_covers_one_evaluation() {
        let m = manager();
        approved(&m, "quality-gate", &["bob"]);
        approved(&m, "quality-gate", &["carol"]);
        assert!(m.claim_bypass("quality-gate", "eval-1", 0).is_some());
        assert!(m.claim_bypass("quality-gate", "eval-2", 0).is_some());
        assert!(m.claim_bypass("quality-gate", "eval-3", 0).is_none());
    }

    #[test]
    fn consumption_survives_snapshot_restore() {
        let m = manager();
        approved(&m, "quality-gate", &["bob"]);
        m.claim_bypass("quality-gate", "eval-1", 0).unwrap();

        let other = manager();
        other.restore(m.snapshot());
        assert!(other.find_approved_bypass("quality-gate").is_none());
        assert!(other.claim_bypass("quality-gate", "eval-2", 0).is_none());
    }

    #[test]
    fn concurrent_claims_spend_bypass_once() {
        for _ in 0..20 {
            let m = Arc::new(manager());
            approved(&m, "quality-gate", &["bob"]);

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = ["eval-a", "eval-b"]
                .into_iter()
                .map(|evaluation| {
                    let m = Arc::clone(&m);
                    let b = Arc::clone(&barrier);
                    thread::spawn(move || {
                        b.wait();
                        m.claim_bypass("quality-gate", evaluation, 0)
                    })
                })
                .collect();
            let claimed = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .count();
            assert_eq!(claimed, 1);
        }
    }
}
