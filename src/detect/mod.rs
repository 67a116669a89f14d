pub mod classifier;
pub mod detector;
pub mod evaluator;
pub mod temporal;

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::{AppliesTo, Comparison, ConstraintType, DriftType, MetricKey, SeverityBands};
use crate::records::{FieldIssue, Month};

pub use classifier::{applicable_constraints, classify};
pub use detector::{detect_all, detect_all_with};
pub use evaluator::{classify_severity, deviation_ratio, evaluate, Evaluation};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Low, Severity::Medium, Severity::High];
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{display}")
    }
}

/// One violated rule for one district-month (or one district window).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftResult {
    pub district_id: String,
    pub district_name: String,
    pub month: Month,
    pub drift_type: DriftType,
    pub constraint_type: ConstraintType,
    pub metric: MetricKey,
    pub comparison: Comparison,
    /// Scope of the violated rule; temporal rules cover every district.
    pub applies_to: AppliesTo,
    pub actual_value: f64,
    pub expected_threshold: f64,
    pub deviation_ratio: f64,
    pub severity: Severity,
    /// Declaration slot of the rule: constraints first, then temporal rules.
    pub rule_index: usize,
    /// Set for window-variance findings only.
    pub window_months: Option<usize>,
}

/// A record that could not be checked against a rule that applies to it.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("district {district_id} ({month}): {metric} {issue}, needed by {rule}")]
pub struct InvalidRecordError {
    pub district_id: String,
    pub district_name: String,
    pub month: Month,
    pub metric: MetricKey,
    pub rule: String,
    pub rule_index: usize,
    pub issue: FieldIssue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    pub policy_domain: String,
    pub intent_fingerprint: String,
    pub generated_at: DateTime<Utc>,
    pub records_evaluated: usize,
    pub records_out_of_period: usize,
    pub districts_evaluated: usize,
    pub findings: Vec<DriftResult>,
    pub invalid_records: Vec<InvalidRecordError>,
}

impl DetectionReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.invalid_records.is_empty()
    }

    pub fn findings_for<'a>(&'a self, district_id: &'a str) -> impl Iterator<Item = &'a DriftResult> {
        self.findings
            .iter()
            .filter(move |f| f.district_id == district_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub parallel: bool,
    /// Used when the intent carries no band override.
    pub default_bands: SeverityBands,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            default_bands: SeverityBands::default(),
        }
    }
}
