use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::detect::{DriftResult, InvalidRecordError, Severity};
use crate::explain::{explain, SummaryStats};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn severity_cell(severity: Severity) -> Cell {
    let cell = Cell::new(severity.to_string().to_uppercase());
    match severity {
        Severity::High => cell.fg(Color::Red),
        Severity::Medium => cell.fg(Color::Yellow),
        Severity::Low => cell.fg(Color::Green),
    }
}

pub fn render_findings_table(findings: &[DriftResult]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "District",
        "Month",
        "Type",
        "Rule",
        "Actual",
        "Threshold",
        "Deviation",
        "Severity",
    ]);
    for f in findings {
        let rule = match f.window_months {
            Some(months) => format!("variance of {} over {months} months", f.metric),
            None => format!("{} {}", f.metric, f.comparison),
        };
        table.add_row(Row::from(vec![
            Cell::new(format!("{} ({})", f.district_name, f.district_id)),
            Cell::new(f.month.to_string()),
            Cell::new(f.drift_type.to_string()),
            Cell::new(format!("{}: {rule}", f.constraint_type)),
            Cell::new(format!("{:.2}", f.actual_value)),
            Cell::new(format!("{:.2}", f.expected_threshold)),
            Cell::new(format!("{:.1}%", f.deviation_ratio * 100.0)),
            severity_cell(f.severity),
        ]));
    }
    table.to_string()
}

pub fn render_invalid_records_table(items: &[InvalidRecordError]) -> String {
    let mut table = new_table();
    table.set_header(vec!["District", "Month", "Metric", "Issue", "Needed by"]);
    for item in items {
        table.add_row(vec![
            format!("{} ({})", item.district_name, item.district_id),
            item.month.to_string(),
            item.metric.to_string(),
            item.issue.to_string(),
            item.rule.clone(),
        ]);
    }
    table.to_string()
}

pub fn render_summary_table(stats: &SummaryStats) -> String {
    let mut table = new_table();
    table.set_header(vec!["Dimension", "Key", "Findings"]);
    table.add_row(vec!["total".to_string(), "-".to_string(), stats.total.to_string()]);
    for (severity, count) in stats.by_severity.iter().rev() {
        table.add_row(Row::from(vec![
            Cell::new("severity"),
            severity_cell(*severity),
            Cell::new(count.to_string()),
        ]));
    }
    for (drift_type, count) in &stats.by_drift_type {
        table.add_row(vec![
            "drift type".to_string(),
            drift_type.to_string(),
            count.to_string(),
        ]);
    }
    for (month, count) in &stats.by_month {
        table.add_row(vec!["month".to_string(), month.to_string(), count.to_string()]);
    }
    table.add_row(vec![
        "districts".to_string(),
        "affected".to_string(),
        stats.districts_affected.to_string(),
    ]);
    table.to_string()
}

/// Numbered explanation sentences, one per finding.
pub fn render_explanations(findings: &[DriftResult]) -> String {
    if findings.is_empty() {
        return "No findings.".to_string();
    }
    findings
        .iter()
        .enumerate()
        .map(|(idx, f)| format!("{}. {}", idx + 1, explain(f)))
        .collect::<Vec<_>>()
        .join("\n")
}
