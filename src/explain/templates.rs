use crate::detect::DriftResult;
use crate::intent::{AppliesTo, Comparison, ConstraintType, DriftType, MetricKey};

fn bound_phrase(comparison: Comparison) -> &'static str {
    match comparison {
        Comparison::Gte => "below the required minimum of",
        Comparison::Gt => "not above the required floor of",
        Comparison::Lte => "above the permitted maximum of",
        Comparison::Lt => "not below the required ceiling of",
    }
}

fn subject(finding: &DriftResult) -> String {
    format!(
        "District {} ({}) in {}",
        finding.district_name, finding.district_id, finding.month
    )
}

fn amount(metric: MetricKey, value: f64) -> String {
    if metric.is_percentage() {
        format!("{value:.1}%")
    } else {
        format!("{value:.1}")
    }
}

fn scope(applies_to: &AppliesTo) -> String {
    match applies_to {
        AppliesTo::All => "for all districts".to_string(),
        AppliesTo::Group(name) => format!("for target group {name}"),
    }
}

/// Fixed sentence for one finding. Same finding, same text.
pub fn explain(finding: &DriftResult) -> String {
    let bound = bound_phrase(finding.comparison);
    let actual = amount(finding.metric, finding.actual_value);
    let expected = amount(finding.metric, finding.expected_threshold);
    match (finding.drift_type, finding.constraint_type) {
        (DriftType::Metric, ConstraintType::MinimumCoverage) => format!(
            "{}: {} is {actual}, {bound} {expected} {}. Severity: {}.",
            subject(finding),
            finding.metric.label(),
            scope(&finding.applies_to),
            finding.severity
        ),
        (DriftType::Allocation, ConstraintType::ResourceAllocation) => format!(
            "{}: {} is {actual}, {bound} {expected} set for resource allocation {}. Severity: {}.",
            subject(finding),
            finding.metric.label(),
            scope(&finding.applies_to),
            finding.severity
        ),
        (DriftType::Temporal, ConstraintType::TemporalConsistency) => match finding.window_months {
            Some(months) => format!(
                "District {} ({}) shows unstable {} over the {} months ending {}: variance of {:.1} is {} {:.1}. Severity: {}.",
                finding.district_name,
                finding.district_id,
                finding.metric,
                months,
                finding.month,
                finding.actual_value,
                bound,
                finding.expected_threshold,
                finding.severity
            ),
            None => format!(
                "{}: {} of {actual} is {bound} {expected}, indicating inconsistent implementation across months. Severity: {}.",
                subject(finding),
                finding.metric.label(),
                finding.severity
            ),
        },
        _ => format!(
            "{}: {} value {:.1} violates the policy constraint {} {} {:.1}. Severity: {}.",
            subject(finding),
            finding.metric,
            finding.actual_value,
            finding.metric,
            finding.comparison,
            finding.expected_threshold,
            finding.severity
        ),
    }
}
