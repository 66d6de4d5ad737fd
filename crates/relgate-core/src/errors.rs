use crate::types::BypassStatus;

/// Failure of a metrics provider. Recovered per gate, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("results section '{0}' missing")]
    MissingSection(String),
    #[error("results section '{0}' is not an object")]
    MalformedSection(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BypassError {
    #[error("gate not found: {0}")]
    GateNotFound(String),
    #[error("bypass request not found: {0}")]
    RequestNotFound(String),
    #[error("bypass request {id} is {status}, not pending")]
    InvalidState { id: String, status: BypassStatus },
    #[error("{approver} already approved bypass request {id}")]
    DuplicateApprover { id: String, approver: String },
    #[error("invalid bypass request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate gate id: {0}")]
    DuplicateGate(String),
    #[error("duplicate policy name: {0}")]
    DuplicatePolicy(String),
    #[error("policy '{policy}' references unknown gate '{gate}'")]
    UnknownGate { policy: String, gate: String },
    #[error("policy '{policy}' lists blocking gate '{gate}' that is not required")]
    BlockingNotRequired { policy: String, gate: String },
    #[error("policy '{policy}' lists required gate '{gate}' more than once")]
    DuplicateRequiredGate { policy: String, gate: String },
    #[error("policy '{policy}' lists blocking gate '{gate}' more than once")]
    DuplicateBlockingGate { policy: String, gate: String },
    #[error("gate '{0}' is blocking but not required")]
    BlockingGateNotRequired(String),
    #[error("gate '{0}' has no metrics provider")]
    MissingProvider(String),
}

/// Structured check result for `rgate check --json`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckReport {
    pub file: String,
    pub version: String,
    pub pass: bool,
    pub errors: Vec<CheckIssue>,
    pub warnings: Vec<CheckIssue>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckIssue {
    pub code: String,
    pub check: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
