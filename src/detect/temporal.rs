use crate::detect::evaluator::{classify_severity, evaluate_bound};
use crate::detect::{DriftResult, InvalidRecordError};
use crate::intent::{AppliesTo, Comparison, ConstraintType, SeverityBands, TemporalRule};
use crate::records::ImplementationRecord;

/// Districts need at least this many in-scope months before any temporal check.
pub const MIN_TEMPORAL_MONTHS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum WindowCheck {
    /// Fewer than two distinct months in the window.
    Skipped,
    Compliant { variance: f64 },
    Violated(DriftResult),
    Invalid(Vec<InvalidRecordError>),
}

/// Population variance; `None` below two samples.
pub fn population_variance(values: &[f64]) -> Option<f64> {
    if values.len() < MIN_TEMPORAL_MONTHS {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    Some(sum_sq / n)
}

/// Number of distinct months in a month-ordered series.
pub fn distinct_months(series: &[&ImplementationRecord]) -> usize {
    let mut count = 0;
    let mut previous = None;
    for record in series {
        if previous != Some(record.month) {
            count += 1;
            previous = Some(record.month);
        }
    }
    count
}

/// Records from the most recent `months` distinct months of a month-ordered
/// series. Rows sharing a month are kept together.
pub fn trailing_window<'a>(
    series: &'a [&'a ImplementationRecord],
    months: usize,
) -> &'a [&'a ImplementationRecord] {
    let mut seen = 0;
    let mut start = series.len();
    while start > 0 {
        let month = series[start - 1].month;
        if start == series.len() || series[start].month != month {
            if seen == months {
                break;
            }
            seen += 1;
        }
        start -= 1;
    }
    &series[start..]
}

/// Checks one rule over the trailing window of one district's series.
/// `series` must already be sorted by month.
pub fn check_window(
    series: &[&ImplementationRecord],
    rule: &TemporalRule,
    rule_index: usize,
    bands: &SeverityBands,
) -> WindowCheck {
    let window = trailing_window(series, rule.window_months);
    let Some(last) = window.last() else {
        return WindowCheck::Skipped;
    };
    let months = distinct_months(window);
    if months < MIN_TEMPORAL_MONTHS {
        return WindowCheck::Skipped;
    }

    let mut values = Vec::with_capacity(window.len());
    let mut invalid = Vec::new();
    for record in window {
        match record.require_numeric(rule.metric) {
            Ok(v) => values.push(v),
            Err(issue) => invalid.push(InvalidRecordError {
                district_id: record.district_id.clone(),
                district_name: record.district_name.clone(),
                month: record.month,
                metric: rule.metric,
                rule: rule.label(),
                rule_index,
                issue,
            }),
        }
    }
    if !invalid.is_empty() {
        return WindowCheck::Invalid(invalid);
    }

    let Some(variance) = population_variance(&values) else {
        return WindowCheck::Skipped;
    };
    let evaluation = evaluate_bound(variance, rule.max_variance, Comparison::Lte);
    if !evaluation.violated {
        return WindowCheck::Compliant { variance };
    }

    WindowCheck::Violated(DriftResult {
        district_id: last.district_id.clone(),
        district_name: last.district_name.clone(),
        month: last.month,
        drift_type: ConstraintType::TemporalConsistency.drift_type(),
        constraint_type: ConstraintType::TemporalConsistency,
        metric: rule.metric,
        comparison: Comparison::Lte,
        applies_to: AppliesTo::All,
        actual_value: variance,
        expected_threshold: rule.max_variance,
        deviation_ratio: evaluation.deviation_ratio,
        severity: classify_severity(evaluation.deviation_ratio, bands),
        rule_index,
        window_months: Some(months),
    })
}

#[cfg(test)]
mod tests {
    use crate::detect::Severity;
    use crate::intent::{DriftType, MetricKey, SeverityBands, TemporalRule};
    use crate::records::{FieldIssue, ImplementationRecord, Month};

    use super::{check_window, distinct_months, population_variance, trailing_window, WindowCheck};

    fn series(values: &[f64]) -> Vec<ImplementationRecord> {
        values
            .iter()
            .enumerate()
            .map(|(idx, v)| {
                ImplementationRecord::new("D01", "Alpha", Month::new(2024, idx as u32 + 1).unwrap())
                    .with_metric(MetricKey::FundUtilization, *v)
            })
            .collect()
    }

    fn rule(max_variance: f64, window_months: usize) -> TemporalRule {
        TemporalRule {
            metric: MetricKey::FundUtilization,
            max_variance,
            window_months,
        }
    }

    #[test]
    fn variance_needs_two_samples() {
        assert_eq!(population_variance(&[]), None);
        assert_eq!(population_variance(&[4.0]), None);
        assert_eq!(population_variance(&[2.0, 4.0]), Some(1.0));
    }

    #[test]
    fn window_takes_the_most_recent_months() {
        let records = series(&[1.0, 2.0, 3.0, 4.0]);
        let refs = records.iter().collect::<Vec<_>>();
        let window = trailing_window(&refs, 2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].month.to_string(), "2024-03");
        assert_eq!(trailing_window(&refs, 10).len(), 4);
    }

    #[test]
    fn unstable_window_is_attributed_to_its_last_month() {
        let records = series(&[40.0, 80.0, 42.0]);
        let refs = records.iter().collect::<Vec<_>>();
        let WindowCheck::Violated(finding) =
            check_window(&refs, &rule(15.0, 3), 4, &SeverityBands::default())
        else {
            panic!("expected a violation");
        };
        assert_eq!(finding.month.to_string(), "2024-03");
        assert_eq!(finding.drift_type, DriftType::Temporal);
        assert_eq!(finding.window_months, Some(3));
        assert_eq!(finding.rule_index, 4);
        assert_eq!(finding.severity, Severity::High);
        assert!((finding.actual_value - 1016.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn stable_window_is_compliant() {
        let records = series(&[70.0, 72.0, 71.0]);
        let refs = records.iter().collect::<Vec<_>>();
        assert!(matches!(
            check_window(&refs, &rule(15.0, 3), 0, &SeverityBands::default()),
            WindowCheck::Compliant { .. }
        ));
    }

    #[test]
    fn single_month_window_is_skipped() {
        let records = series(&[10.0, 90.0]);
        let refs = records.iter().collect::<Vec<_>>();
        assert_eq!(
            check_window(&refs, &rule(1.0, 1), 0, &SeverityBands::default()),
            WindowCheck::Skipped
        );
    }

    #[test]
    fn rows_sharing_a_month_count_once() {
        let mut records = series(&[10.0, 90.0]);
        records[1].month = records[0].month;
        let refs = records.iter().collect::<Vec<_>>();
        assert_eq!(distinct_months(&refs), 1);
        assert_eq!(
            check_window(&refs, &rule(15.0, 3), 0, &SeverityBands::default()),
            WindowCheck::Skipped
        );
    }

    #[test]
    fn window_spans_distinct_months_not_rows() {
        let mut records = series(&[1.0, 2.0, 3.0, 4.0]);
        records[2].month = records[3].month;
        let refs = records.iter().collect::<Vec<_>>();
        let window = trailing_window(&refs, 2);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].month.to_string(), "2024-02");
        assert_eq!(distinct_months(window), 2);
    }

    #[test]
    fn missing_value_in_window_is_reported_not_evaluated() {
        let mut records = series(&[40.0, 80.0, 42.0]);
        records[1].metrics.clear();
        let refs = records.iter().collect::<Vec<_>>();
        let WindowCheck::Invalid(errors) =
            check_window(&refs, &rule(15.0, 3), 0, &SeverityBands::default())
        else {
            panic!("expected invalid records");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].issue, FieldIssue::Missing);
        assert_eq!(errors[0].month.to_string(), "2024-02");
    }
}
