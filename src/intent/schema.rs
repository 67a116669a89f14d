use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::intent::predicate::Predicate;
use crate::records::Month;

/// Numeric fields of the implementation schema. The set is closed so that an
/// intent naming anything else fails at load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    LiteracyRate,
    Population,
    CoveragePercentage,
    FundUtilization,
    MonthlyVariance,
}

impl MetricKey {
    pub const ALL: [MetricKey; 5] = [
        MetricKey::LiteracyRate,
        MetricKey::Population,
        MetricKey::CoveragePercentage,
        MetricKey::FundUtilization,
        MetricKey::MonthlyVariance,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::LiteracyRate => "literacy_rate",
            Self::Population => "population",
            Self::CoveragePercentage => "coverage_percentage",
            Self::FundUtilization => "fund_utilization",
            Self::MonthlyVariance => "monthly_variance",
        }
    }

    /// Metrics recorded on a 0-100 percentage scale.
    pub fn is_percentage(&self) -> bool {
        matches!(
            self,
            Self::LiteracyRate | Self::CoveragePercentage | Self::FundUtilization
        )
    }

    /// Human wording used by the explanation templates.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LiteracyRate => "Literacy rate",
            Self::Population => "Population",
            Self::CoveragePercentage => "Coverage percentage",
            Self::FundUtilization => "Fund utilization",
            Self::MonthlyVariance => "Monthly variance",
        }
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown metric key: {0}")]
pub struct MetricKeyParseError(pub String);

impl FromStr for MetricKey {
    type Err = MetricKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match normalize_name(s).as_str() {
            "literacy_rate" | "literacy" => MetricKey::LiteracyRate,
            "population" => MetricKey::Population,
            "coverage_percentage" | "coverage" | "coverage_pct" => MetricKey::CoveragePercentage,
            "fund_utilization" | "fund_utilisation" | "utilization" => MetricKey::FundUtilization,
            "monthly_variance" => MetricKey::MonthlyVariance,
            _ => return Err(MetricKeyParseError(s.to_string())),
        };
        Ok(key)
    }
}

/// Lowercases, turns camelCase humps and dashes into underscores.
pub(crate) fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    for (idx, ch) in raw.trim().chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if idx > 0 && !out.ends_with('_') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == ' ' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Bound operators a constraint may use. `==` and `!=` exist only in criteria.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gte,
    Gt,
    Lte,
    Lt,
}

impl Comparison {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gte => ">=",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Lt => "<",
        }
    }

    pub fn is_lower_bound(&self) -> bool {
        matches!(self, Self::Gte | Self::Gt)
    }

    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gte => value >= threshold,
            Self::Gt => value > threshold,
            Self::Lte => value <= threshold,
            Self::Lt => value < threshold,
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported comparison operator: {0}")]
pub struct ComparisonParseError(pub String);

impl FromStr for Comparison {
    type Err = ComparisonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            ">=" | "gte" => Ok(Self::Gte),
            ">" | "gt" => Ok(Self::Gt),
            "<=" | "lte" => Ok(Self::Lte),
            "<" | "lt" => Ok(Self::Lt),
            _ => Err(ComparisonParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DriftType {
    Metric,
    Temporal,
    Allocation,
}

impl Display for DriftType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Metric => "metric",
            Self::Temporal => "temporal",
            Self::Allocation => "allocation",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    MinimumCoverage,
    TemporalConsistency,
    ResourceAllocation,
    MetricThreshold,
}

impl ConstraintType {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::MinimumCoverage => "minimum_coverage",
            Self::TemporalConsistency => "temporal_consistency",
            Self::ResourceAllocation => "resource_allocation",
            Self::MetricThreshold => "metric_threshold",
        }
    }

    pub fn drift_type(&self) -> DriftType {
        match self {
            Self::MinimumCoverage | Self::MetricThreshold => DriftType::Metric,
            Self::TemporalConsistency => DriftType::Temporal,
            Self::ResourceAllocation => DriftType::Allocation,
        }
    }

    /// Operator assumed when the intent leaves `comparison` out.
    pub fn default_comparison(&self) -> Comparison {
        match self {
            Self::TemporalConsistency => Comparison::Lte,
            Self::MinimumCoverage | Self::ResourceAllocation | Self::MetricThreshold => {
                Comparison::Gte
            }
        }
    }
}

impl Display for ConstraintType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown constraint type: {0}")]
pub struct ConstraintTypeParseError(pub String);

impl FromStr for ConstraintType {
    type Err = ConstraintTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_name(s).as_str() {
            "minimum_coverage" | "coverage" => Ok(Self::MinimumCoverage),
            "temporal_consistency" | "temporal" => Ok(Self::TemporalConsistency),
            "resource_allocation" | "allocation" => Ok(Self::ResourceAllocation),
            "metric_threshold" | "metric" | "threshold" => Ok(Self::MetricThreshold),
            _ => Err(ConstraintTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppliesTo {
    All,
    Group(String),
}

impl AppliesTo {
    pub fn matches(&self, groups: &BTreeSet<String>) -> bool {
        match self {
            AppliesTo::All => true,
            AppliesTo::Group(name) => groups.contains(name),
        }
    }
}

impl Display for AppliesTo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppliesTo::All => write!(f, "*"),
            AppliesTo::Group(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Constraint {
    pub constraint_type: ConstraintType,
    pub metric: MetricKey,
    pub threshold: f64,
    pub comparison: Comparison,
    pub applies_to: AppliesTo,
    pub description: Option<String>,
}

impl Constraint {
    pub fn label(&self) -> String {
        format!(
            "{}({} {} {})",
            self.constraint_type, self.metric, self.comparison, self.threshold
        )
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} for {}", self.label(), self.applies_to)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetGroup {
    pub name: String,
    pub criteria: Predicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalRule {
    pub metric: MetricKey,
    pub max_variance: f64,
    pub window_months: usize,
}

impl TemporalRule {
    pub fn label(&self) -> String {
        format!(
            "temporal_rule(variance of {} over {} months <= {})",
            self.metric, self.window_months, self.max_variance
        )
    }
}

/// Inclusive month bounds; an open side accepts everything on that side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EffectivePeriod {
    pub from: Option<Month>,
    pub to: Option<Month>,
}

impl EffectivePeriod {
    pub fn contains(&self, month: Month) -> bool {
        self.from.map_or(true, |from| month >= from) && self.to.map_or(true, |to| month <= to)
    }
}

/// Upper edges of the Low and Medium bands on the deviation-ratio axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeverityBands {
    pub low_max: f64,
    pub medium_max: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            low_max: 0.15,
            medium_max: 0.35,
        }
    }
}

impl SeverityBands {
    pub fn validate(&self) -> Result<(), String> {
        if !self.low_max.is_finite() || !self.medium_max.is_finite() {
            return Err("band edges must be finite".to_string());
        }
        if self.low_max < 0.0 || self.low_max > self.medium_max {
            return Err(format!(
                "expected 0 <= low_max <= medium_max, got {} and {}",
                self.low_max, self.medium_max
            ));
        }
        Ok(())
    }
}

/// Validated policy intent. Only [`crate::intent::load_intent`] builds one, so
/// every metric, operator and group reference in here has been resolved.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PolicyIntent {
    policy_domain: String,
    target_groups: Vec<TargetGroup>,
    constraints: Vec<Constraint>,
    temporal_rules: Vec<TemporalRule>,
    effective_period: Option<EffectivePeriod>,
    severity_bands: Option<SeverityBands>,
    fingerprint: String,
}

impl PolicyIntent {
    pub(crate) fn with_fingerprint(
        policy_domain: String,
        target_groups: Vec<TargetGroup>,
        constraints: Vec<Constraint>,
        temporal_rules: Vec<TemporalRule>,
        effective_period: Option<EffectivePeriod>,
        severity_bands: Option<SeverityBands>,
    ) -> Self {
        let mut intent = Self {
            policy_domain,
            target_groups,
            constraints,
            temporal_rules,
            effective_period,
            severity_bands,
            fingerprint: String::new(),
        };
        let canonical = serde_json::to_string(&intent).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        intent.fingerprint = format!("{:x}", hasher.finalize());
        intent
    }

    pub fn policy_domain(&self) -> &str {
        &self.policy_domain
    }

    pub fn target_groups(&self) -> &[TargetGroup] {
        &self.target_groups
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn temporal_rules(&self) -> &[TemporalRule] {
        &self.temporal_rules
    }

    pub fn effective_period(&self) -> Option<&EffectivePeriod> {
        self.effective_period.as_ref()
    }

    pub fn severity_bands(&self) -> Option<SeverityBands> {
        self.severity_bands
    }

    /// SHA-256 over the canonical JSON form of the validated intent.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn group(&self, name: &str) -> Option<&TargetGroup> {
        self.target_groups.iter().find(|g| g.name == name)
    }

    pub fn in_period(&self, month: Month) -> bool {
        self.effective_period
            .as_ref()
            .map_or(true, |period| period.contains(month))
    }

    /// Constraints, in declaration order, whose applicability matches any of
    /// `groups` or is the wildcard.
    pub fn constraints_for(&self, groups: &BTreeSet<String>) -> Vec<(usize, &Constraint)> {
        self.constraints
            .iter()
            .enumerate()
            .filter(|(_, c)| c.applies_to.matches(groups))
            .collect()
    }

    /// Ordering slot of a temporal rule: after every declared constraint.
    pub fn temporal_rule_index(&self, rule_position: usize) -> usize {
        self.constraints.len() + rule_position
    }
}
