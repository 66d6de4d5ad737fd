//! Startup-time registry of gates and policies.
//!
//! Built once through [`RegistryBuilder`], then shared read-only (usually in an
//! `Arc`) by the policy engine and the bypass manager.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use relgate_core::errors::RegistryError;
use relgate_core::spec::gates::GateSpec;
use relgate_core::spec::policy::PolicySpec;
use relgate_core::spec::ReleaseConfig;
use relgate_core::traits::MetricsProvider;

use crate::providers;

/// Name of the policy synthesized for configs that declare none.
pub const DEFAULT_POLICY: &str = "default";

/// A gate definition bound to its metrics provider.
#[derive(Clone)]
pub struct Gate {
    pub spec: GateSpec,
    pub provider: Arc<dyn MetricsProvider>,
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("id", &self.spec.id)
            .field("provider", &self.provider.describe())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    gates: HashMap<String, Gate>,
    gate_order: Vec<String>,
    policies: HashMap<String, PolicySpec>,
    policy_order: Vec<String>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Register every gate and policy of a config, wiring built-in providers.
    ///
    /// A config without policies gets a single `default` policy derived from
    /// the gates' own `required`/`blocking` flags.
    pub fn from_config(config: &ReleaseConfig) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        for spec in &config.gates {
            let provider = spec
                .provider
                .as_ref()
                .map(providers::from_spec)
                .ok_or_else(|| RegistryError::MissingProvider(spec.id.clone()))?;
            builder = builder.register_gate(spec.clone(), provider);
        }
        if config.policies.is_empty() {
            builder = builder.register_policy(PolicySpec::from_gate_flags(
                DEFAULT_POLICY,
                &config.gates,
            ));
        }
        for policy in &config.policies {
            builder = builder.register_policy(policy.clone());
        }
        builder.build()
    }

    pub fn gate(&self, id: &str) -> Option<&Gate> {
        self.gates.get(id)
    }

    pub fn policy(&self, name: &str) -> Option<&PolicySpec> {
        self.policies.get(name)
    }

    /// Gates in registration order.
    pub fn gates(&self) -> impl Iterator<Item = &Gate> {
        self.gate_order.iter().filter_map(|id| self.gates.get(id))
    }

    /// Policies in registration order.
    pub fn policies(&self) -> impl Iterator<Item = &PolicySpec> {
        self.policy_order
            .iter()
            .filter_map(|name| self.policies.get(name))
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    gates: Vec<Gate>,
    policies: Vec<PolicySpec>,
}

impl RegistryBuilder {
    pub fn register_gate(mut self, spec: GateSpec, provider: Arc<dyn MetricsProvider>) -> Self {
        self.gates.push(Gate { spec, provider });
        self
    }

    pub fn register_policy(mut self, policy: PolicySpec) -> Self {
        self.policies.push(policy);
        self
    }

    /// Validate cross references and freeze the registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut registry = Registry::default();

        for gate in self.gates {
            let id = gate.spec.id.clone();
            if gate.spec.blocking && !gate.spec.required {
                return Err(RegistryError::BlockingGateNotRequired(id));
            }
            if registry.gates.contains_key(&id) {
                return Err(RegistryError::DuplicateGate(id));
            }
            registry.gate_order.push(id.clone());
            registry.gates.insert(id, gate);
        }

        for policy in self.policies {
            if registry.policies.contains_key(&policy.name) {
                return Err(RegistryError::DuplicatePolicy(policy.name));
            }
            if let Some(gate) = first_duplicate(&policy.required_gates) {
                return Err(RegistryError::DuplicateRequiredGate {
                    policy: policy.name.clone(),
                    gate: gate.to_string(),
                });
            }
            if let Some(gate) = first_duplicate(&policy.blocking_gates) {
                return Err(RegistryError::DuplicateBlockingGate {
                    policy: policy.name.clone(),
                    gate: gate.to_string(),
                });
            }
            let required: HashSet<&str> =
                policy.required_gates.iter().map(String::as_str).collect();
            if let Some(gate) = policy
                .required_gates
                .iter()
                .find(|g| !registry.gates.contains_key(g.as_str()))
            {
                return Err(RegistryError::UnknownGate {
                    policy: policy.name.clone(),
                    gate: gate.clone(),
                });
            }
            if let Some(gate) = policy
                .blocking_gates
                .iter()
                .find(|g| !required.contains(g.as_str()))
            {
                return Err(RegistryError::BlockingNotRequired {
                    policy: policy.name.clone(),
                    gate: gate.clone(),
                });
            }
            registry.policy_order.push(policy.name.clone());
            registry.policies.insert(policy.name.clone(), policy);
        }

        Ok(registry)
    }
}

fn first_duplicate(ids: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    ids.iter().map(String::as_str).find(|id| !seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FnProvider;
    use relgate_core::traits::MetricReport;
    use relgate_core::types::{Priority, UnitFloat};

    fn spec(id: &str) -> GateSpec {
        GateSpec {
            id: id.into(),
            name: id.into(),
            category: "test".into(),
            priority: Priority::Medium,
            required: true,
            blocking: false,
            threshold: UnitFloat::ONE,
            criteria: vec![],
            provider: None,
            description: None,
        }
    }

    fn noop() -> Arc<dyn MetricsProvider> {
        Arc::new(FnProvider::new(|_| Ok(MetricReport::default())))
    }

    fn policy(name: &str, required: &[&str], blocking: &[&str]) -> PolicySpec {
        PolicySpec {
            name: name.into(),
            required_gates: required.iter().map(|s| s.to_string()).collect(),
            blocking_gates: blocking.iter().map(|s| s.to_string()).collect(),
            allow_bypass: true,
            approval_required: false,
            minimum_approvers: 0,
            description: None,
        }
    }

    #[test]
    fn builds_and_preserves_order() {
        let registry = Registry::builder()
            .register_gate(spec("b"), noop())
            .register_gate(spec("a"), noop())
            .register_policy(policy("deployment", &["a", "b"], &["a"]))
            .build()
            .unwrap();
        let ids: Vec<&str> = registry.gates().map(|g| g.spec.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(registry.policy("deployment").is_some());
        assert!(registry.gate("a").is_some());
    }

    #[test]
    fn duplicate_gate_rejected() {
        let err = Registry::builder()
            .register_gate(spec("a"), noop())
            .register_gate(spec("a"), noop())
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateGate("a".into()));
    }

    #[test]
    fn policy_with_unknown_gate_rejected() {
        let err = Registry::builder()
            .register_gate(spec("a"), noop())
            .register_policy(policy("deployment", &["a", "ghost"], &[]))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownGate { gate, .. } if gate == "ghost"));
    }

    #[test]
    fn policy_listing_a_gate_twice_rejected() {
        let err = Registry::builder()
            .register_gate(spec("a"), noop())
            .register_gate(spec("b"), noop())
            .register_policy(policy("deployment", &["a", "a", "b"], &[]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateRequiredGate {
                policy: "deployment".into(),
                gate: "a".into(),
            }
        );

        let err = Registry::builder()
            .register_gate(spec("a"), noop())
            .register_policy(policy("deployment", &["a"], &["a", "a"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateBlockingGate { gate, .. } if gate == "a"));
    }

    #[test]
    fn blocking_gate_must_be_required() {
        let err = Registry::builder()
            .register_gate(spec("a"), noop())
            .register_gate(spec("b"), noop())
            .register_policy(policy("deployment", &["a"], &["b"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, RegistryError::BlockingNotRequired { .. }));
    }

    #[test]
    fn gate_flagged_blocking_but_optional_rejected() {
        let mut s = spec("a");
        s.required = false;
        s.blocking = true;
        let err = Registry::builder()
            .register_gate(s, noop())
            .build()
            .unwrap_err();
        assert_eq!(err, RegistryError::BlockingGateNotRequired("a".into()));
    }

    #[test]
    fn from_config_requires_provider() {
        let config = ReleaseConfig {
            schema_uri: None,
            version: "1".into(),
            settings: Default::default(),
            gates: vec![spec("a")],
            policies: vec![],
        };
        let err = Registry::from_config(&config).unwrap_err();
        assert_eq!(err, RegistryError::MissingProvider("a".into()));
    }

    #[test]
    fn from_template_config() {
        let config: ReleaseConfig = serde_json::from_value(
            relgate_core::templates::generate("standard").unwrap(),
        )
        .unwrap();
        let registry = Registry::from_config(&config).unwrap();
        assert_eq!(registry.gates().count(), 6);
        assert_eq!(registry.policies().count(), 3);
    }

    #[test]
    fn config_without_policies_gets_default() {
        let mut config: ReleaseConfig = serde_json::from_value(
            relgate_core::templates::generate("standard").unwrap(),
        )
        .unwrap();
        config.policies.clear();
        let registry = Registry::from_config(&config).unwrap();
        let default = registry.policy(DEFAULT_POLICY).unwrap();
        let required: Vec<&str> = config
            .gates
            .iter()
            .filter(|g| g.required)
            .map(|g| g.id.as_str())
            .collect();
        assert_eq!(default.required_gates, required);
        assert!(default.is_blocking("security-gate"));
        assert_eq!(registry.policies().count(), 1);
    }
}
