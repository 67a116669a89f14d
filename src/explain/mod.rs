pub mod summary;
pub mod templates;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::Severity;
use crate::intent::DriftType;
use crate::records::Month;

pub use summary::{format_report, render_summary, summarize};
pub use templates::explain;

/// Counting projection of a finding list; the only aggregate downstream
/// consumers receive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SummaryStats {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_drift_type: BTreeMap<DriftType, usize>,
    pub by_month: BTreeMap<Month, usize>,
    pub by_district: BTreeMap<String, usize>,
    pub districts_affected: usize,
}

impl SummaryStats {
    pub fn count_for_severity(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn count_for_type(&self, drift_type: DriftType) -> usize {
        self.by_drift_type.get(&drift_type).copied().unwrap_or(0)
    }
}
