use serde::{Deserialize, Serialize};

use crate::detect::Severity;
use crate::intent::{Comparison, Constraint, SeverityBands};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub violated: bool,
    pub deviation_ratio: f64,
}

impl Evaluation {
    pub const COMPLIANT: Evaluation = Evaluation {
        violated: false,
        deviation_ratio: 0.0,
    };
}

pub fn evaluate(value: f64, constraint: &Constraint) -> Evaluation {
    evaluate_bound(value, constraint.threshold, constraint.comparison)
}

pub fn evaluate_bound(value: f64, threshold: f64, comparison: Comparison) -> Evaluation {
    if comparison.holds(value, threshold) {
        return Evaluation::COMPLIANT;
    }
    Evaluation {
        violated: true,
        deviation_ratio: deviation_ratio(value, threshold, comparison),
    }
}

/// Shortfall (lower bounds) or excess (upper bounds) relative to the
/// threshold magnitude, floored at zero. A zero threshold has no scale, so the
/// raw gap is used instead.
pub fn deviation_ratio(value: f64, threshold: f64, comparison: Comparison) -> f64 {
    let gap = if comparison.is_lower_bound() {
        threshold - value
    } else {
        value - threshold
    };
    let scale = threshold.abs();
    let ratio = if scale > 0.0 { gap / scale } else { gap };
    ratio.max(0.0)
}

/// Step function over the deviation ratio; never decreases as the ratio grows.
pub fn classify_severity(ratio: f64, bands: &SeverityBands) -> Severity {
    if ratio <= bands.low_max {
        Severity::Low
    } else if ratio <= bands.medium_max {
        Severity::Medium
    } else {
        Severity::High
    }
}
