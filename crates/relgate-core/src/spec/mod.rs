pub mod gates;
pub mod policy;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::gates::GateSpec;
use self::policy::PolicySpec;
use crate::types::UnitFloat;

/// Top-level relgate configuration document (v1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema_uri: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub settings: Settings,

    pub gates: Vec<GateSpec>,

    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

fn default_version() -> String {
    "1".to_string()
}

impl ReleaseConfig {
    pub fn gate(&self, id: &str) -> Option<&GateSpec> {
        self.gates.iter().find(|g| g.id == id)
    }

    pub fn policy(&self, name: &str) -> Option<&PolicySpec> {
        self.policies.iter().find(|p| p.name == name)
    }
}

/// Engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_secs: u64,

    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_gates: usize,

    /// Pending bypass requests are auto-rejected after this many hours.
    #[serde(default = "default_bypass_ttl")]
    pub bypass_ttl_hours: u64,

    /// Minimum passed+bypassed share for a `conditional` verdict.
    #[serde(default = "default_conditional_ratio")]
    pub conditional_ratio: UnitFloat,
}

fn default_evaluation_timeout() -> u64 {
    300
}

fn default_provider_timeout() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    4
}

fn default_bypass_ttl() -> u64 {
    24
}

fn default_conditional_ratio() -> UnitFloat {
    UnitFloat::new(0.8).unwrap_or(UnitFloat::ONE)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            evaluation_timeout_secs: default_evaluation_timeout(),
            provider_timeout_secs: default_provider_timeout(),
            max_concurrent_gates: default_max_concurrent(),
            bypass_ttl_hours: default_bypass_ttl(),
            conditional_ratio: default_conditional_ratio(),
        }
    }
}

impl Settings {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn bypass_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.bypass_ttl_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults_fill_missing_fields() {
        let s: Settings = serde_json::from_str(r#"{"provider_timeout_secs": 5}"#).unwrap();
        assert_eq!(s.provider_timeout_secs, 5);
        assert_eq!(s.evaluation_timeout_secs, 300);
        assert_eq!(s.max_concurrent_gates, 4);
        assert_eq!(s.bypass_ttl_hours, 24);
        assert_eq!(s.conditional_ratio.value(), 0.8);
    }

    #[test]
    fn config_lookup_by_id_and_name() {
        let cfg: ReleaseConfig = serde_json::from_value(serde_json::json!({
            "gates": [{
                "id": "unit-tests",
                "name": "Unit Tests",
                "category": "testing",
                "priority": "high",
                "threshold": 1.0,
                "criteria": [{"metric": "failed", "operator": "==", "expected": 0}]
            }],
            "policies": [{"name": "deployment", "required_gates": ["unit-tests"]}]
        }))
        .unwrap();
        assert_eq!(cfg.version, "1");
        assert!(cfg.gate("unit-tests").is_some());
        assert!(cfg.gate("missing").is_none());
        assert!(cfg.policy("deployment").is_some());
    }
}
