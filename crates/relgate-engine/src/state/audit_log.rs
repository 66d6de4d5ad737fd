use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use relgate_core::types::AuditEventType;

const GENESIS: &str = "genesis";

fn line_hash(line: &str) -> String {
    format!("sha256:{:x}", Sha256::digest(line.as_bytes()))
}

/// Append an event to the hash-chained audit log. Returns the new entry's hash.
///
/// Each entry records `prev_hash`, the SHA-256 of the previous line, so any
/// edit to an earlier entry breaks every later link. The first entry links to
/// "genesis".
pub fn append_audit(path: &Path, event_type: AuditEventType, payload: &Value) -> Result<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| format!("cannot read audit {}", path.display())),
    };
    let prev_hash = content
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(line_hash)
        .unwrap_or_else(|| GENESIS.to_string());

    let entry = json!({
        "event_type": event_type,
        "ts": chrono::Utc::now().to_rfc3339(),
        "payload": payload,
        "prev_hash": prev_hash,
    });
    let line = serde_json::to_string(&entry)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open audit {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("cannot write audit {}", path.display()))?;
    file.sync_all()?;

    Ok(line_hash(&line))
}

/// Verify the hash chain. Returns the number of entries.
pub fn verify_chain(path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read audit {}", path.display()))?;

    let mut count = 0u64;
    let mut prev_hash = GENESIS.to_string();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = serde_json::from_str(line)
            .with_context(|| format!("invalid JSON at line {}", i + 1))?;
        let recorded = entry
            .get("prev_hash")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if recorded != prev_hash {
            bail!(
                "hash chain broken at entry {count} (line {}): expected prev_hash '{prev_hash}', got '{recorded}'",
                i + 1
            );
        }
        prev_hash = line_hash(line);
        count += 1;
    }
    Ok(count)
}

/// All entries, oldest first. A missing log has none.
pub fn read_entries(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read audit {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid JSON at line {}", i + 1))
        })
        .collect()
}
