use serde_json::{json, Value};

/// Built-in config templates.
pub fn list_templates() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "standard",
            "Six gates (tests, security, performance, reliability, quality, accessibility); deployment, staging and hotfix policies",
        ),
        (
            "minimal",
            "Tests and security gates with a single deployment policy",
        ),
    ]
}

pub fn generate(template: &str) -> Option<Value> {
    match template {
        "standard" => Some(standard()),
        "minimal" => Some(minimal()),
        _ => None,
    }
}

fn test_gate() -> Value {
    json!({
        "id": "test-gate",
        "name": "Test Execution",
        "category": "testing",
        "priority": "critical",
        "required": true,
        "blocking": true,
        "threshold": 0.9,
        "criteria": [
            {"metric": "test_success_rate", "operator": ">=", "expected": 0.95},
            {"metric": "code_coverage", "operator": ">=", "expected": 0.8},
            {"metric": "flaky_tests", "operator": "<=", "expected": 5}
        ],
        "provider": {"kind": "section", "section": "tests"}
    })
}

fn security_gate() -> Value {
    json!({
        "id": "security-gate",
        "name": "Security Scan",
        "category": "security",
        "priority": "critical",
        "required": true,
        "blocking": true,
        "threshold": 0.98,
        "criteria": [
            {"metric": "critical_vulnerabilities", "operator": "==", "expected": 0},
            {"metric": "high_vulnerabilities", "operator": "<=", "expected": 0},
            {"metric": "secrets_detected", "operator": "==", "expected": false},
            {"metric": "dependency_audit_passed", "operator": "==", "expected": true},
            {"metric": "security_score", "operator": ">=", "expected": 90}
        ],
        "provider": {"kind": "section", "section": "security"}
    })
}

fn standard() -> Value {
    json!({
        "version": "1",
        "settings": {
            "evaluation_timeout_secs": 300,
            "provider_timeout_secs": 60,
            "max_concurrent_gates": 4,
            "bypass_ttl_hours": 24,
            "conditional_ratio": 0.8
        },
        "gates": [
            test_gate(),
            security_gate(),
            {
                "id": "performance-gate",
                "name": "Performance Benchmarks",
                "category": "performance",
                "priority": "high",
                "required": true,
                "blocking": false,
                "threshold": 0.75,
                "criteria": [
                    {"metric": "response_time_p95", "operator": "<=", "expected": 500},
                    {"metric": "error_rate", "operator": "<=", "expected": 0.01},
                    {"metric": "throughput", "operator": ">=", "expected": 100},
                    {"metric": "memory_usage", "operator": "<=", "expected": 0.85}
                ],
                "provider": {"kind": "section", "section": "performance"}
            },
            {
                "id": "reliability-gate",
                "name": "Reliability",
                "category": "reliability",
                "priority": "high",
                "required": true,
                "blocking": false,
                "threshold": 0.75,
                "criteria": [
                    {"metric": "availability", "operator": ">=", "expected": 0.999},
                    {"metric": "mean_time_to_recovery", "operator": "<=", "expected": 30},
                    {"metric": "chaos_tests_passed", "operator": "==", "expected": true},
                    {"metric": "health_check_success_rate", "operator": ">=", "expected": 0.99}
                ],
                "provider": {"kind": "section", "section": "reliability"}
            },
            {
                "id": "quality-gate",
                "name": "Code Quality",
                "category": "quality",
                "priority": "medium",
                "required": true,
                "blocking": false,
                "threshold": 0.75,
                "criteria": [
                    {"metric": "code_quality_score", "operator": ">=", "expected": 80},
                    {"metric": "technical_debt_ratio", "operator": "<=", "expected": 0.05},
                    {"metric": "duplication_ratio", "operator": "<=", "expected": 0.03},
                    {"metric": "lint_errors", "operator": "==", "expected": 0}
                ],
                "provider": {"kind": "section", "section": "quality"}
            },
            {
                "id": "accessibility-gate",
                "name": "Accessibility",
                "category": "accessibility",
                "priority": "low",
                "required": false,
                "blocking": false,
                "threshold": 0.5,
                "criteria": [
                    {"metric": "accessibility_score", "operator": ">=", "expected": 90},
                    {"metric": "wcag_violations", "operator": "==", "expected": 0}
                ],
                "provider": {"kind": "section", "section": "accessibility"}
            }
        ],
        "policies": [
            {
                "name": "deployment",
                "description": "Production release",
                "required_gates": [
                    "test-gate",
                    "security-gate",
                    "performance-gate",
                    "reliability-gate",
                    "quality-gate",
                    "accessibility-gate"
                ],
                "blocking_gates": ["test-gate", "security-gate"],
                "allow_bypass": true,
                "approval_required": true,
                "minimum_approvers": 1
            },
            {
                "name": "staging",
                "description": "Pre-production environment",
                "required_gates": ["test-gate", "security-gate", "quality-gate"],
                "blocking_gates": ["security-gate"],
                "allow_bypass": true,
                "approval_required": false,
                "minimum_approvers": 0
            },
            {
                "name": "hotfix",
                "description": "Emergency patch release",
                "required_gates": ["test-gate", "security-gate"],
                "blocking_gates": ["security-gate"],
                "allow_bypass": true,
                "approval_required": true,
                "minimum_approvers": 1
            }
        ]
    })
}

fn minimal() -> Value {
    json!({
        "version": "1",
        "gates": [test_gate(), security_gate()],
        "policies": [
            {
                "name": "deployment",
                "required_gates": ["test-gate", "security-gate"],
                "blocking_gates": ["test-gate", "security-gate"]
            }
        ]
    })
}
