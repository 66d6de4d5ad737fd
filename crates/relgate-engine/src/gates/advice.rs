/// Targeted remediation advice for a failing metric.
///
/// Unknown metric names fall back to a generic message.
pub fn for_metric(metric: &str) -> String {
    let advice = match metric {
        "test_success_rate" | "failed_tests" => "Investigate and fix failing tests",
        "code_coverage" | "line_coverage" | "branch_coverage" => {
            "Add tests for uncovered code paths to raise coverage"
        }
        "flaky_tests" => "Quarantine or stabilize flaky tests",
        "critical_vulnerabilities" => "Remediate critical vulnerabilities before release",
        "high_vulnerabilities" => "Patch or mitigate high-severity vulnerabilities",
        "secrets_detected" => "Remove committed secrets and rotate the exposed credentials",
        "dependency_audit_passed" => "Upgrade or replace dependencies flagged by the audit",
        "security_score" => "Address security scan findings to raise the security score",
        "response_time_p95" | "response_time" => {
            "Profile slow endpoints and reduce response time"
        }
        "error_rate" => "Investigate the source of elevated error rates",
        "throughput" => "Optimize hot paths or scale out to restore throughput",
        "memory_usage" => "Investigate memory growth and possible leaks",
        "availability" => "Review recent incidents and improve service availability",
        "mean_time_to_recovery" => "Improve alerting and runbooks to shorten recovery time",
        "chaos_tests_passed" => "Fix resilience gaps surfaced by chaos experiments",
        "health_check_success_rate" => "Fix failing health checks",
        "code_quality_score" => "Refactor flagged modules to raise the code quality score",
        "technical_debt_ratio" => "Schedule work to pay down technical debt",
        "duplication_ratio" => "Extract duplicated code into shared components",
        "lint_errors" => "Fix lint errors",
        "accessibility_score" | "wcag_violations" => "Fix reported accessibility violations",
        _ => return format!("Improve {metric} to meet threshold"),
    };
    advice.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_metric_has_targeted_advice() {
        assert_eq!(for_metric("test_success_rate"), "Investigate and fix failing tests");
    }

    #[test]
    fn unknown_metric_falls_back() {
        assert_eq!(
            for_metric("bundle_size_kb"),
            "Improve bundle_size_kb to meet threshold"
        );
    }
}
