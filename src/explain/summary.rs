use crate::detect::{DetectionReport, DriftResult, Severity};
use crate::explain::templates::explain;
use crate::explain::SummaryStats;
use crate::intent::DriftType;

pub fn summarize(findings: &[DriftResult]) -> SummaryStats {
    let mut stats = SummaryStats {
        total: findings.len(),
        ..SummaryStats::default()
    };
    for severity in Severity::ALL {
        stats.by_severity.insert(severity, 0);
    }
    for drift_type in [DriftType::Metric, DriftType::Temporal, DriftType::Allocation] {
        stats.by_drift_type.insert(drift_type, 0);
    }

    for finding in findings {
        *stats.by_severity.entry(finding.severity).or_default() += 1;
        *stats.by_drift_type.entry(finding.drift_type).or_default() += 1;
        *stats.by_month.entry(finding.month).or_default() += 1;
        *stats
            .by_district
            .entry(finding.district_id.clone())
            .or_default() += 1;
    }
    stats.districts_affected = stats.by_district.len();
    stats
}

pub fn render_summary(stats: &SummaryStats) -> String {
    if stats.total == 0 {
        return "No policy drift detected. Implementation aligns with policy intent.".to_string();
    }

    let mut lines = vec![
        "Policy Drift Detection Summary".to_string(),
        "=".repeat(50),
        format!("Total drift instances detected: {}", stats.total),
        String::new(),
        "By type:".to_string(),
    ];
    for (drift_type, count) in &stats.by_drift_type {
        lines.push(format!("  {drift_type}: {count}"));
    }
    lines.push(String::new());
    lines.push("By severity:".to_string());
    for severity in Severity::ALL.iter().rev() {
        lines.push(format!(
            "  {severity}: {}",
            stats.count_for_severity(*severity)
        ));
    }
    lines.push(String::new());
    lines.push("By month:".to_string());
    for (month, count) in &stats.by_month {
        lines.push(format!("  {month}: {count}"));
    }
    lines.push(String::new());
    lines.push(format!("Districts with drift: {}", stats.districts_affected));
    lines.join("\n")
}

/// Summary, numbered findings, then the records that could not be checked.
pub fn format_report(report: &DetectionReport) -> String {
    let stats = summarize(&report.findings);
    let mut lines = vec![
        format!("Policy domain: {}", report.policy_domain),
        format!("Intent fingerprint: {}", report.intent_fingerprint),
        format!(
            "Records evaluated: {} ({} outside effective period) across {} districts",
            report.records_evaluated, report.records_out_of_period, report.districts_evaluated
        ),
        String::new(),
        render_summary(&stats),
        String::new(),
        "Detailed Findings:".to_string(),
        "=".repeat(50),
        String::new(),
    ];
    for (idx, finding) in report.findings.iter().enumerate() {
        lines.push(format!("{}. {}", idx + 1, explain(finding)));
        lines.push(String::new());
    }

    if !report.invalid_records.is_empty() {
        lines.push(format!(
            "Data Quality Issues ({}):",
            report.invalid_records.len()
        ));
        lines.push("=".repeat(50));
        for issue in &report.invalid_records {
            lines.push(format!("- {issue}"));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::detect::{DetectionReport, DriftResult, InvalidRecordError, Severity};
    use crate::intent::{AppliesTo, ConstraintType, DriftType, MetricKey};
    use crate::records::{FieldIssue, Month};

    use super::{format_report, render_summary, summarize};

    fn finding(id: &str, month: u32, constraint_type: ConstraintType, severity: Severity) -> DriftResult {
        DriftResult {
            district_id: id.to_string(),
            district_name: format!("District {id}"),
            month: Month::new(2024, month).unwrap(),
            drift_type: constraint_type.drift_type(),
            constraint_type,
            metric: MetricKey::CoveragePercentage,
            comparison: constraint_type.default_comparison(),
            applies_to: AppliesTo::All,
            actual_value: 50.0,
            expected_threshold: 75.0,
            deviation_ratio: 0.3,
            severity,
            rule_index: 0,
            window_months: None,
        }
    }

    fn findings() -> Vec<DriftResult> {
        vec![
            finding("D01", 1, ConstraintType::MinimumCoverage, Severity::Medium),
            finding("D01", 2, ConstraintType::ResourceAllocation, Severity::High),
            finding("D02", 2, ConstraintType::MinimumCoverage, Severity::Low),
        ]
    }

    #[test]
    fn counts_by_severity_type_month_and_district() {
        let stats = summarize(&findings());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_for_severity(Severity::High), 1);
        assert_eq!(stats.count_for_severity(Severity::Low), 1);
        assert_eq!(stats.count_for_type(DriftType::Metric), 2);
        assert_eq!(stats.count_for_type(DriftType::Temporal), 0);
        assert_eq!(stats.by_month[&Month::new(2024, 2).unwrap()], 2);
        assert_eq!(stats.by_district["D01"], 2);
        assert_eq!(stats.districts_affected, 2);
    }

    #[test]
    fn summary_serializes_with_string_keys() {
        let value = serde_json::to_value(summarize(&findings())).expect("json");
        assert_eq!(value["by_severity"]["high"], 1);
        assert_eq!(value["by_month"]["2024-01"], 1);
    }

    #[test]
    fn empty_summary_says_no_drift() {
        assert_eq!(
            render_summary(&summarize(&[])),
            "No policy drift detected. Implementation aligns with policy intent."
        );
    }

    #[test]
    fn rendered_summary_lists_every_section() {
        let text = render_summary(&summarize(&findings()));
        assert!(text.contains("Total drift instances detected: 3"));
        assert!(text.contains("  allocation: 1"));
        assert!(text.contains("  high: 1"));
        assert!(text.contains("  2024-02: 2"));
        assert!(text.ends_with("Districts with drift: 2"));
    }

    #[test]
    fn report_keeps_invalid_records_apart_from_findings() {
        let report = DetectionReport {
            policy_domain: "education".to_string(),
            intent_fingerprint: "abc".to_string(),
            generated_at: Utc::now(),
            records_evaluated: 4,
            records_out_of_period: 0,
            districts_evaluated: 2,
            findings: findings(),
            invalid_records: vec![InvalidRecordError {
                district_id: "D03".to_string(),
                district_name: "District D03".to_string(),
                month: Month::new(2024, 1).unwrap(),
                metric: MetricKey::CoveragePercentage,
                rule: "minimum_coverage(coverage_percentage >= 75)".to_string(),
                rule_index: 0,
                issue: FieldIssue::Missing,
            }],
        };
        let text = format_report(&report);
        assert!(text.contains("1. District District D01 (D01) in 2024-01"));
        assert!(text.contains("3. District District D02 (D02)"));
        assert!(text.contains("Data Quality Issues (1):"));
        assert!(text.contains(
            "- district D03 (2024-01): coverage_percentage is missing, needed by minimum_coverage(coverage_percentage >= 75)"
        ));
    }
}
