use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

use relgate_core::bypass::BypassRequest;
use relgate_core::types::AuditEventType;

use super::atomic::{atomic_write, AdvisoryLock};
use super::audit_log::append_audit;

const BYPASSES_FILE: &str = "bypasses.json";
const AUDIT_FILE: &str = "audit.jsonl";

/// On-disk state shared between CLI invocations.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (creating if needed) a state directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("cannot create state dir {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn bypasses_path(&self) -> PathBuf {
        self.root.join(BYPASSES_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.root.join(AUDIT_FILE)
    }

    /// Persisted bypass requests; empty when none were saved yet.
    pub fn load_bypasses(&self) -> Result<Vec<BypassRequest>> {
        let path = self.bypasses_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid bypass store {}", path.display()))
    }

    /// Take the state lock for a load -> mutate -> audit -> write cycle.
    pub fn lock(&self) -> Result<StateWriter<'_>> {
        let lock = AdvisoryLock::acquire(&self.bypasses_path())
            .with_context(|| format!("cannot lock state in {}", self.root.display()))?;
        Ok(StateWriter {
            dir: self,
            lock,
        })
    }
}

/// Coordinated writer: holds the advisory lock until dropped.
pub struct StateWriter<'a> {
    dir: &'a StateDir,
    lock: AdvisoryLock,
}

impl StateWriter<'_> {
    pub fn load_bypasses(&self) -> Result<Vec<BypassRequest>> {
        self.dir.load_bypasses()
    }

    pub fn save_bypasses(&self, requests: &[BypassRequest]) -> Result<()> {
        let json = serde_json::to_string_pretty(requests)?;
        atomic_write(&self.dir.bypasses_path(), json.as_bytes())
    }

    pub fn audit(&self, event_type: AuditEventType, payload: &Value) -> Result<String> {
        append_audit(&self.dir.audit_path(), event_type, payload)
    }

    /// Keep the lock from going stale during a long-running command.
    pub fn refresh_lock(&self) -> Result<()> {
        self.lock.refresh()
    }
}
