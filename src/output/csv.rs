use anyhow::Result;

use crate::detect::{DriftResult, InvalidRecordError};

pub fn findings_to_csv(findings: &[DriftResult]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "district_id",
        "district_name",
        "month",
        "drift_type",
        "constraint_type",
        "metric",
        "comparison",
        "actual_value",
        "expected_threshold",
        "deviation_ratio",
        "severity",
        "window_months",
    ])?;
    for f in findings {
        writer.write_record([
            f.district_id.clone(),
            f.district_name.clone(),
            f.month.to_string(),
            f.drift_type.to_string(),
            f.constraint_type.to_string(),
            f.metric.to_string(),
            f.comparison.to_string(),
            format!("{:.4}", f.actual_value),
            format!("{:.4}", f.expected_threshold),
            format!("{:.4}", f.deviation_ratio),
            f.severity.to_string(),
            f.window_months.map(|w| w.to_string()).unwrap_or_default(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn invalid_records_to_csv(items: &[InvalidRecordError]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["district_id", "district_name", "month", "metric", "rule", "issue"])?;
    for item in items {
        writer.write_record([
            item.district_id.clone(),
            item.district_name.clone(),
            item.month.to_string(),
            item.metric.to_string(),
            item.rule.clone(),
            item.issue.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use crate::detect::{DriftResult, Severity};
    use crate::intent::{AppliesTo, Comparison, ConstraintType, DriftType, MetricKey};
    use crate::records::Month;

    use super::findings_to_csv;

    #[test]
    fn writes_header_and_one_row_per_finding() {
        let finding = DriftResult {
            district_id: "D01".to_string(),
            district_name: "Alpha, North".to_string(),
            month: Month::new(2024, 1).unwrap(),
            drift_type: DriftType::Metric,
            constraint_type: ConstraintType::MinimumCoverage,
            metric: MetricKey::CoveragePercentage,
            comparison: Comparison::Gte,
            applies_to: AppliesTo::Group("priority".to_string()),
            actual_value: 50.0,
            expected_threshold: 75.0,
            deviation_ratio: 1.0 / 3.0,
            severity: Severity::Medium,
            rule_index: 0,
            window_months: None,
        };
        let csv = findings_to_csv(&[finding]).expect("csv");
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("district_id,district_name,month"));
        assert_eq!(
            lines[1],
            "D01,\"Alpha, North\",2024-01,metric,minimum_coverage,coverage_percentage,>=,50.0000,75.0000,0.3333,medium,"
        );
    }
}
