use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::detect::classifier::{applicable_constraints, classify};
use crate::detect::evaluator::{classify_severity, evaluate};
use crate::detect::temporal::{check_window, distinct_months, WindowCheck, MIN_TEMPORAL_MONTHS};
use crate::detect::{DetectOptions, DetectionReport, DriftResult, InvalidRecordError};
use crate::intent::{ConstraintType, PolicyIntent, SeverityBands};
use crate::records::{group_by_district, ImplementationRecord};

#[derive(Debug, Default)]
struct DistrictOutcome {
    findings: Vec<DriftResult>,
    invalid: Vec<InvalidRecordError>,
}

impl DistrictOutcome {
    fn merge(mut self, other: DistrictOutcome) -> Self {
        self.findings.extend(other.findings);
        self.invalid.extend(other.invalid);
        self
    }
}

pub fn detect_all(intent: &PolicyIntent, records: &[ImplementationRecord]) -> DetectionReport {
    detect_all_with(intent, records, &DetectOptions::default())
}

/// Runs every applicable constraint and temporal rule over `records`.
/// Districts are evaluated independently, so the parallel and sequential paths
/// produce the same report once the final sort has run.
pub fn detect_all_with(
    intent: &PolicyIntent,
    records: &[ImplementationRecord],
    options: &DetectOptions,
) -> DetectionReport {
    let (in_scope, out_of_period): (Vec<&ImplementationRecord>, Vec<&ImplementationRecord>) =
        records.iter().partition(|r| intent.in_period(r.month));
    let series = group_by_district(in_scope.iter().copied())
        .into_iter()
        .collect::<Vec<_>>();
    let bands = intent.severity_bands().unwrap_or(options.default_bands);
    debug!(
        "evaluating {} records across {} districts ({} outside effective period)",
        in_scope.len(),
        series.len(),
        out_of_period.len()
    );

    let outcome = if options.parallel {
        series
            .par_iter()
            .map(|(_, history)| evaluate_district(intent, history, &bands))
            .reduce(DistrictOutcome::default, DistrictOutcome::merge)
    } else {
        series
            .iter()
            .map(|(_, history)| evaluate_district(intent, history, &bands))
            .fold(DistrictOutcome::default(), DistrictOutcome::merge)
    };

    let DistrictOutcome {
        mut findings,
        invalid: mut invalid_records,
    } = outcome;
    findings.sort_by(|a, b| {
        a.district_id
            .cmp(&b.district_id)
            .then(a.month.cmp(&b.month))
            .then(a.rule_index.cmp(&b.rule_index))
    });
    invalid_records.sort_by(|a, b| {
        a.district_id
            .cmp(&b.district_id)
            .then(a.month.cmp(&b.month))
            .then(a.rule_index.cmp(&b.rule_index))
    });

    if !invalid_records.is_empty() {
        warn!(
            "{} record checks could not run because of missing or non-numeric values",
            invalid_records.len()
        );
    }
    debug!("detected {} drift findings", findings.len());

    DetectionReport {
        policy_domain: intent.policy_domain().to_string(),
        intent_fingerprint: intent.fingerprint().to_string(),
        generated_at: Utc::now(),
        records_evaluated: in_scope.len(),
        records_out_of_period: out_of_period.len(),
        districts_evaluated: series.len(),
        findings,
        invalid_records,
    }
}

fn evaluate_district(
    intent: &PolicyIntent,
    history: &[&ImplementationRecord],
    bands: &SeverityBands,
) -> DistrictOutcome {
    let mut outcome = DistrictOutcome::default();
    let temporal_eligible = distinct_months(history) >= MIN_TEMPORAL_MONTHS;

    for record in history {
        let groups = classify(record, intent);
        for (rule_index, constraint) in applicable_constraints(intent, &groups) {
            if constraint.constraint_type == ConstraintType::TemporalConsistency
                && !temporal_eligible
            {
                continue;
            }
            let value = match record.require_numeric(constraint.metric) {
                Ok(value) => value,
                Err(issue) => {
                    outcome.invalid.push(InvalidRecordError {
                        district_id: record.district_id.clone(),
                        district_name: record.district_name.clone(),
                        month: record.month,
                        metric: constraint.metric,
                        rule: constraint.label(),
                        rule_index,
                        issue,
                    });
                    continue;
                }
            };
            let evaluation = evaluate(value, constraint);
            if !evaluation.violated {
                continue;
            }
            outcome.findings.push(DriftResult {
                district_id: record.district_id.clone(),
                district_name: record.district_name.clone(),
                month: record.month,
                drift_type: constraint.constraint_type.drift_type(),
                constraint_type: constraint.constraint_type,
                metric: constraint.metric,
                comparison: constraint.comparison,
                applies_to: constraint.applies_to.clone(),
                actual_value: value,
                expected_threshold: constraint.threshold,
                deviation_ratio: evaluation.deviation_ratio,
                severity: classify_severity(evaluation.deviation_ratio, bands),
                rule_index,
                window_months: None,
            });
        }
    }

    if temporal_eligible {
        for (position, rule) in intent.temporal_rules().iter().enumerate() {
            let rule_index = intent.temporal_rule_index(position);
            match check_window(history, rule, rule_index, bands) {
                WindowCheck::Violated(finding) => outcome.findings.push(finding),
                WindowCheck::Invalid(errors) => outcome.invalid.extend(errors),
                WindowCheck::Skipped | WindowCheck::Compliant { .. } => {}
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::detect::{DetectOptions, Severity};
    use crate::intent::{load_intent, DriftType, MetricKey, PolicyIntent};
    use crate::records::{FieldIssue, ImplementationRecord, Month};

    use super::{detect_all, detect_all_with};

    fn intent() -> PolicyIntent {
        load_intent(&json!({
            "policy_domain": "education",
            "target_groups": [
                { "name": "priority", "criteria": "literacy_rate < 65" }
            ],
            "constraints": [
                { "type": "minimum_coverage", "metric": "coverage_percentage", "threshold": 75, "comparison": ">=", "applies_to": "priority" },
                { "type": "resource_allocation", "metric": "fund_utilization", "threshold": 60, "comparison": ">=", "applies_to": "*" },
                { "type": "temporal_consistency", "metric": "monthly_variance", "threshold": 20, "comparison": "<=", "applies_to": "*" }
            ],
            "temporal_rules": { "metric": "fund_utilization", "max_variance": 15, "window_months": 3 },
            "effective_period": { "from": "2024-01", "to": "2024-06" }
        }))
        .expect("intent")
    }

    fn record(id: &str, month: &str, literacy: f64, coverage: f64, funds: f64) -> ImplementationRecord {
        ImplementationRecord::new(id, format!("District {id}"), month.parse::<Month>().unwrap())
            .with_metric(MetricKey::LiteracyRate, literacy)
            .with_metric(MetricKey::CoveragePercentage, coverage)
            .with_metric(MetricKey::FundUtilization, funds)
            .with_metric(MetricKey::MonthlyVariance, 5.0)
    }

    fn batch() -> Vec<ImplementationRecord> {
        vec![
            record("D02", "2024-02", 70.0, 90.0, 55.0),
            record("D01", "2024-03", 60.0, 80.0, 42.0),
            record("D01", "2024-01", 60.0, 50.0, 40.0),
            record("D01", "2024-02", 60.0, 74.0, 80.0),
            record("D03", "2023-12", 10.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn findings_are_sorted_by_district_month_and_rule() {
        let report = detect_all(&intent(), &batch());
        let keys = report
            .findings
            .iter()
            .map(|f| (f.district_id.as_str(), f.month.to_string(), f.rule_index))
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                ("D01", "2024-01".to_string(), 0),
                ("D01", "2024-01".to_string(), 1),
                ("D01", "2024-02".to_string(), 0),
                ("D01", "2024-03".to_string(), 1),
                ("D01", "2024-03".to_string(), 3),
                ("D02", "2024-02".to_string(), 1),
            ]
        );
        assert_eq!(report.findings[4].drift_type, DriftType::Temporal);
        assert_eq!(report.findings[5].severity, Severity::Low);
    }

    #[test]
    fn records_outside_the_period_are_excluded_not_flagged() {
        let report = detect_all(&intent(), &batch());
        assert_eq!(report.records_out_of_period, 1);
        assert_eq!(report.records_evaluated, 4);
        assert!(report.findings.iter().all(|f| f.district_id != "D03"));
    }

    #[test]
    fn parallel_and_sequential_runs_agree() {
        let intent = intent();
        let records = batch();
        let parallel = detect_all_with(&intent, &records, &DetectOptions::default());
        let sequential = detect_all_with(
            &intent,
            &records,
            &DetectOptions {
                parallel: false,
                ..DetectOptions::default()
            },
        );
        assert_eq!(parallel.findings, sequential.findings);
        assert_eq!(parallel.invalid_records, sequential.invalid_records);
    }

    #[test]
    fn per_record_temporal_constraint_needs_two_months() {
        let intent = intent();
        let lone = vec![record("D09", "2024-01", 80.0, 90.0, 90.0)
            .with_metric(MetricKey::MonthlyVariance, 99.0)];
        assert!(detect_all(&intent, &lone).findings.is_empty());

        let pair = vec![
            record("D09", "2024-01", 80.0, 90.0, 90.0).with_metric(MetricKey::MonthlyVariance, 99.0),
            record("D09", "2024-02", 80.0, 90.0, 91.0),
        ];
        let report = detect_all(&intent, &pair);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule_index, 2);
        assert_eq!(report.findings[0].drift_type, DriftType::Temporal);
        assert_eq!(report.findings[0].window_months, None);
    }

    #[test]
    fn duplicate_rows_for_one_month_skip_temporal_checks() {
        let intent = intent();
        let records = vec![
            record("D04", "2024-01", 80.0, 90.0, 10.0).with_metric(MetricKey::MonthlyVariance, 99.0),
            record("D04", "2024-01", 80.0, 90.0, 90.0),
        ];
        let report = detect_all(&intent, &records);
        assert!(report
            .findings
            .iter()
            .all(|f| f.drift_type != DriftType::Temporal));
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].rule_index, 1);
    }

    #[test]
    fn non_numeric_value_is_collected_separately() {
        let intent = intent();
        let records = vec![
            record("D05", "2024-01", 80.0, 90.0, 70.0)
                .with_text(MetricKey::FundUtilization, "pending"),
            record("D06", "2024-01", 80.0, 90.0, 30.0),
        ];
        let report = detect_all(&intent, &records);
        assert_eq!(report.invalid_records.len(), 1);
        assert_eq!(
            report.invalid_records[0].issue,
            FieldIssue::NonNumeric("pending".to_string())
        );
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].district_id, "D06");
        assert!(!report.is_clean());
    }

    #[test]
    fn intent_band_override_wins_over_options() {
        let mut raw = json!({
            "policy_domain": "education",
            "target_groups": [],
            "constraints": [
                { "type": "resource_allocation", "metric": "fund_utilization", "threshold": 100 }
            ],
            "severity_bands": { "low_max": 0.01, "medium_max": 0.02 }
        });
        let records = vec![record("D01", "2024-01", 80.0, 90.0, 95.0)];
        let report = detect_all(&load_intent(&raw).expect("intent"), &records);
        assert_eq!(report.findings[0].severity, Severity::High);

        raw.as_object_mut().expect("object").remove("severity_bands");
        let report = detect_all(&load_intent(&raw).expect("intent"), &records);
        assert_eq!(report.findings[0].severity, Severity::Low);
    }
}
