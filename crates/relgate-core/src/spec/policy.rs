use serde::{Deserialize, Serialize};

use super::gates::GateSpec;

/// A named deployment rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,

    /// Evaluated in declaration order.
    pub required_gates: Vec<String>,

    #[serde(default)]
    pub blocking_gates: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_bypass: bool,

    #[serde(default)]
    pub approval_required: bool,

    #[serde(default)]
    pub minimum_approvers: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}

impl PolicySpec {
    /// Build a policy from the gates' own `required`/`blocking` flags.
    pub fn from_gate_flags(name: impl Into<String>, gates: &[GateSpec]) -> Self {
        Self {
            name: name.into(),
            required_gates: gates
                .iter()
                .filter(|g| g.required)
                .map(|g| g.id.clone())
                .collect(),
            blocking_gates: gates
                .iter()
                .filter(|g| g.required && g.blocking)
                .map(|g| g.id.clone())
                .collect(),
            allow_bypass: true,
            approval_required: false,
            minimum_approvers: 0,
            description: None,
        }
    }

    pub fn is_blocking(&self, gate_id: &str) -> bool {
        self.blocking_gates.iter().any(|g| g == gate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, UnitFloat};

    fn gate(id: &str, required: bool, blocking: bool) -> GateSpec {
        GateSpec {
            id: id.into(),
            name: id.into(),
            category: "test".into(),
            priority: Priority::High,
            required,
            blocking,
            threshold: UnitFloat::ONE,
            criteria: vec![],
            provider: None,
            description: None,
        }
    }

    #[test]
    fn from_gate_flags_keeps_declaration_order() {
        let gates = vec![
            gate("b", true, false),
            gate("a", true, true),
            gate("c", false, true),
        ];
        let policy = PolicySpec::from_gate_flags("default", &gates);
        assert_eq!(policy.required_gates, vec!["b", "a"]);
        assert_eq!(policy.blocking_gates, vec!["a"]);
        assert!(policy.is_blocking("a"));
        assert!(!policy.is_blocking("c"));
    }

    #[test]
    fn defaults_allow_bypass() {
        let policy: PolicySpec =
            serde_json::from_str(r#"{"name":"staging","required_gates":["x"]}"#).unwrap();
        assert!(policy.allow_bypass);
        assert!(!policy.approval_required);
        assert_eq!(policy.minimum_approvers, 0);
        assert!(policy.blocking_gates.is_empty());
    }
}
