use std::collections::{HashMap, HashSet};

use anyhow::{bail, Context, Result};
use jsonschema::Validator;
use serde_json::Value;

use crate::errors::{CheckIssue, CheckReport};
use crate::spec::ReleaseConfig;

const SCHEMA_V1: &str = include_str!("../schema/relgate-v1.schema.json");

/// Compile the embedded config schema.
pub fn validator() -> Result<Validator> {
    let schema: Value =
        serde_json::from_str(SCHEMA_V1).context("embedded schema is invalid JSON")?;
    Validator::new(&schema).map_err(|e| anyhow::anyhow!("schema compilation failed: {e}"))
}

/// Read, schema-validate, consistency-check and deserialize a config file.
pub fn load_checked(path: &str) -> Result<ReleaseConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("cannot read config {path}"))?;
    let data: Value =
        serde_json::from_str(&content).with_context(|| format!("{path}: invalid JSON"))?;
    let report = check(&data, path, false);
    if !report.pass {
        let msgs: Vec<String> = report
            .errors
            .iter()
            .map(|e| format!("  [{}] {}", e.code, e.message))
            .collect();
        bail!("{path}: config check failed:\n{}", msgs.join("\n"));
    }
    serde_json::from_value(data).with_context(|| format!("{path}: invalid config"))
}

/// Full check producing a structured report (for `rgate check --json`).
pub fn check(data: &Value, file: &str, strict: bool) -> CheckReport {
    let version = data
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or("1")
        .to_string();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match validator() {
        Ok(v) => {
            for error in v.iter_errors(data) {
                let path = error.instance_path.to_string();
                errors.push(CheckIssue {
                    code: "E001".to_string(),
                    check: "schema".to_string(),
                    message: error.to_string(),
                    path: Some(if path.is_empty() {
                        "$(root)".to_string()
                    } else {
                        format!("${path}")
                    }),
                });
            }
        }
        Err(e) => errors.push(CheckIssue {
            code: "E000".to_string(),
            check: "schema".to_string(),
            message: e.to_string(),
            path: None,
        }),
    }

    // Consistency checks only make sense on a structurally valid document.
    if errors.is_empty() {
        check_gates(data, &mut errors, &mut warnings);
        check_policies(data, &mut errors, &mut warnings);
    }

    let pass = errors.is_empty() && (!strict || warnings.is_empty());
    CheckReport {
        file: file.to_string(),
        version,
        pass,
        errors,
        warnings,
    }
}

fn gates(data: &Value) -> &[Value] {
    data.get("gates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn policies(data: &Value) -> &[Value] {
    data.get("policies")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn flag(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn strings<'a>(v: &'a Value, key: &str) -> Vec<&'a str> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn check_gates(data: &Value, errors: &mut Vec<CheckIssue>, warnings: &mut Vec<CheckIssue>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let referenced: HashSet<&str> = policies(data)
        .iter()
        .flat_map(|p| strings(p, "required_gates"))
        .collect();

    for (i, gate) in gates(data).iter().enumerate() {
        let id = gate.get("id").and_then(Value::as_str).unwrap_or("");
        if !seen.insert(id) {
            errors.push(CheckIssue {
                code: "E010".to_string(),
                check: "gates".to_string(),
                message: format!("duplicate gate id '{id}'"),
                path: Some(format!("$.gates[{i}].id")),
            });
        }

        if flag(gate, "blocking") && !flag(gate, "required") {
            errors.push(CheckIssue {
                code: "E014".to_string(),
                check: "gates".to_string(),
                message: format!("gate '{id}' is blocking but not required"),
                path: Some(format!("$.gates[{i}].blocking")),
            });
        }

        if gate.get("provider").is_none() {
            errors.push(CheckIssue {
                code: "E015".to_string(),
                check: "gates".to_string(),
                message: format!("gate '{id}' has no metrics provider"),
                path: Some(format!("$.gates[{i}]")),
            });
        }

        let criteria = gate
            .get("criteria")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if criteria == 0 {
            warnings.push(CheckIssue {
                code: "W001".to_string(),
                check: "lint".to_string(),
                message: format!("gate '{id}' has no criteria and always passes"),
                path: Some(format!("$.gates[{i}].criteria")),
            });
        }

        if gate.get("threshold").and_then(Value::as_f64) == Some(0.0) {
            warnings.push(CheckIssue {
                code: "W003".to_string(),
                check: "lint".to_string(),
                message: format!("gate '{id}' has threshold 0 and always passes"),
                path: Some(format!("$.gates[{i}].threshold")),
            });
        }

        if !referenced.contains(id) {
            warnings.push(CheckIssue {
                code: "W004".to_string(),
                check: "lint".to_string(),
                message: format!("gate '{id}' is not required by any policy"),
                path: Some(format!("$.gates[{i}]")),
            });
        }
    }
}

fn check_policies(data: &Value, errors: &mut Vec<CheckIssue>, warnings: &mut Vec<CheckIssue>) {
    let known: HashSet<&str> = gates(data)
        .iter()
        .filter_map(|g| g.get("id").and_then(Value::as_str))
        .collect();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (i, policy) in policies(data).iter().enumerate() {
        let name = policy.get("name").and_then(Value::as_str).unwrap_or("");
        if seen.insert(name, i).is_some() {
            errors.push(CheckIssue {
                code: "E011".to_string(),
                check: "policies".to_string(),
                message: format!("duplicate policy name '{name}'"),
                path: Some(format!("$.policies[{i}].name")),
            });
        }

        let required = strings(policy, "required_gates");
        for (j, gate) in required.iter().enumerate() {
            if !known.contains(gate) {
                errors.push(CheckIssue {
                    code: "E012".to_string(),
                    check: "policies".to_string(),
                    message: format!("policy '{name}' references unknown gate '{gate}'"),
                    path: Some(format!("$.policies[{i}].required_gates[{j}]")),
                });
            }
        }

        for (j, gate) in strings(policy, "blocking_gates").iter().enumerate() {
            if !required.contains(gate) {
                errors.push(CheckIssue {
                    code: "E013".to_string(),
                    check: "policies".to_string(),
                    message: format!(
                        "policy '{name}' lists blocking gate '{gate}' that is not required"
                    ),
                    path: Some(format!("$.policies[{i}].blocking_gates[{j}]")),
                });
            }
        }

        let min_approvers = policy
            .get("minimum_approvers")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if flag(policy, "approval_required") && min_approvers == 0 {
            warnings.push(CheckIssue {
                code: "W002".to_string(),
                check: "lint".to_string(),
                message: format!("policy '{name}' requires approval but minimum_approvers is 0"),
                path: Some(format!("$.policies[{i}].minimum_approvers")),
            });
        }

        if required.is_empty() {
            warnings.push(CheckIssue {
                code: "W005".to_string(),
                check: "lint".to_string(),
                message: format!("policy '{name}' requires no gates and always passes"),
                path: Some(format!("$.policies[{i}].required_gates")),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "version": "1",
            "gates": [{
                "id": "security-gate",
                "name": "Security",
                "category": "security",
                "priority": "critical",
                "required": true,
                "blocking": true,
                "threshold": 0.98,
                "criteria": [{"metric": "critical_vulnerabilities", "operator": "==", "expected": 0}],
                "provider": {"kind": "section", "section": "security"}
            }],
            "policies": [{
                "name": "deployment",
                "required_gates": ["security-gate"],
                "blocking_gates": ["security-gate"]
            }]
        })
    }

    #[test]
    fn minimal_config_passes_strict() {
        let report = check(&minimal(), "relgate.json", true);
        assert!(report.pass, "{:?} {:?}", report.errors, report.warnings);
    }

    #[test]
    fn schema_rejects_threshold_out_of_range() {
        let mut data = minimal();
        data["gates"][0]["threshold"] = json!(1.5);
        let report = check(&data, "relgate.json", false);
        assert!(!report.pass);
        assert_eq!(report.errors[0].code, "E001");
    }

    #[test]
    fn blocking_gate_must_be_required_by_policy() {
        let mut data = minimal();
        data["policies"][0]["required_gates"] = json!([]);
        let report = check(&data, "relgate.json", false);
        let codes: Vec<&str> = report.errors.iter().map(|e| e.code.as_str()).collect();
        assert!(codes.contains(&"E013"), "{codes:?}");
    }

    #[test]
    fn unknown_gate_reference_is_error() {
        let mut data = minimal();
        data["policies"][0]["required_gates"] = json!(["security-gate", "ghost"]);
        let report = check(&data, "relgate.json", false);
        assert!(report.errors.iter().any(|e| e.code == "E012"));
    }

    #[test]
    fn blocking_without_required_on_gate_is_error() {
        let mut data = minimal();
        data["gates"][0]["required"] = json!(false);
        let report = check(&data, "relgate.json", false);
        assert!(report.errors.iter().any(|e| e.code == "E014"));
    }

    #[test]
    fn empty_criteria_warns_and_fails_strict_only() {
        let mut data = minimal();
        data["gates"][0]["criteria"] = json!([]);
        assert!(check(&data, "relgate.json", false).pass);
        let strict = check(&data, "relgate.json", true);
        assert!(!strict.pass);
        assert_eq!(strict.warnings[0].code, "W001");
    }

    #[test]
    fn load_checked_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relgate.json");
        std::fs::write(&path, serde_json::to_string(&minimal()).unwrap()).unwrap();
        let cfg = load_checked(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.gates.len(), 1);
        assert_eq!(cfg.policies[0].name, "deployment");
    }
}
