use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BypassStatus, Priority, Urgency};

/// A request to waive one gate for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BypassRequest {
    pub id: String,
    pub gate_id: String,
    pub reason: String,
    pub requested_by: String,
    #[serde(default)]
    pub urgency: Urgency,
    pub required_approvals: u32,
    #[serde(default)]
    pub approvals: Vec<Approval>,
    pub status: BypassStatus,
    pub created_at: DateTime<Utc>,
    /// Deadline for reaching quorum while pending.
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    /// Evaluation that applied this bypass. Set once; the bypass is spent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl BypassRequest {
    /// Critical gates need two distinct approvers, everything else one.
    pub fn approvals_for(priority: Priority) -> u32 {
        if priority == Priority::Critical {
            2
        } else {
            1
        }
    }

    pub fn has_approved(&self, approver: &str) -> bool {
        self.approvals.iter().any(|a| a.approver == approver)
    }

    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    /// Approved and not yet applied by an evaluation.
    pub fn is_available(&self) -> bool {
        self.status == BypassStatus::Approved && self.consumed_by.is_none()
    }

    pub fn is_pending_past(&self, now: DateTime<Utc>) -> bool {
        self.status == BypassStatus::Pending && now > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub by: String,
    pub reason: String,
}
