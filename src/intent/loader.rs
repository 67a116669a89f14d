use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::intent::predicate::{Clause, Predicate, PredicateOp, PredicateParseError};
use crate::intent::schema::{
    AppliesTo, Comparison, Constraint, ConstraintType, EffectivePeriod, MetricKey, PolicyIntent,
    SeverityBands, TargetGroup, TemporalRule,
};
use crate::records::Month;

/// Structural problems with an intent. Any of these aborts a run before
/// detection starts.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MalformedIntentError {
    #[error("intent does not match the expected shape: {0}")]
    Shape(String),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("{location}: unknown metric `{name}`")]
    UnknownMetric { location: String, name: String },
    #[error("{location}: unknown constraint type `{name}`")]
    UnknownConstraintType { location: String, name: String },
    #[error("{location}: unsupported comparison operator `{operator}`")]
    UnsupportedOperator { location: String, operator: String },
    #[error("target group `{group}`: invalid criteria: {source}")]
    InvalidCriteria {
        group: String,
        #[source]
        source: PredicateParseError,
    },
    #[error("duplicate target group `{0}`")]
    DuplicateGroup(String),
    #[error("target group name `{0}` is reserved for the wildcard")]
    ReservedGroupName(String),
    #[error("{location}: applies to undeclared target group `{group}`")]
    UnknownGroup { location: String, group: String },
    #[error("{location}: invalid threshold {value}")]
    InvalidThreshold { location: String, value: f64 },
    #[error("{location}: window_months must be at least 1, got {value}")]
    InvalidWindow { location: String, value: i64 },
    #[error("invalid effective period: {0}")]
    InvalidPeriod(String),
    #[error("invalid severity bands: {0}")]
    InvalidSeverityBands(String),
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    #[serde(alias = "policyDomain", alias = "scheme_name", alias = "schemeName")]
    policy_domain: Option<String>,
    #[serde(alias = "targetGroups")]
    target_groups: Option<Vec<RawTargetGroup>>,
    constraints: Option<Vec<RawConstraint>>,
    #[serde(alias = "temporalRules")]
    temporal_rules: Option<RawTemporalRules>,
    #[serde(alias = "effectivePeriod")]
    effective_period: Option<RawPeriod>,
    #[serde(alias = "severityBands")]
    severity_bands: Option<RawBands>,
}

#[derive(Debug, Deserialize)]
struct RawTargetGroup {
    name: Option<String>,
    criteria: Option<RawCriteria>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCriteria {
    Expression(String),
    Clauses(Vec<String>),
    Ranges(BTreeMap<String, RawRange>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRange {
    Bounds(RawBounds),
    Exact(f64),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBounds {
    min: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawConstraint {
    #[serde(rename = "type", alias = "constraint_type", alias = "constraintType")]
    constraint_type: Option<String>,
    metric: Option<String>,
    threshold: Option<f64>,
    #[serde(alias = "operator")]
    comparison: Option<String>,
    #[serde(alias = "appliesTo")]
    applies_to: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTemporalRules {
    One(RawTemporalRule),
    Many(Vec<RawTemporalRule>),
}

#[derive(Debug, Deserialize)]
struct RawTemporalRule {
    metric: Option<String>,
    #[serde(alias = "maxVariance")]
    max_variance: Option<f64>,
    #[serde(alias = "windowMonths")]
    window_months: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawPeriod {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBands {
    #[serde(alias = "lowMax")]
    low_max: Option<f64>,
    #[serde(alias = "mediumMax")]
    medium_max: Option<f64>,
}

/// Validates already-deserialized intent input.
pub fn load_intent(raw: &serde_json::Value) -> Result<PolicyIntent, MalformedIntentError> {
    let raw = RawIntent::deserialize(raw).map_err(|e| MalformedIntentError::Shape(e.to_string()))?;

    let policy_domain = raw
        .policy_domain
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| MalformedIntentError::MissingField("policy_domain".to_string()))?;

    let target_groups = build_groups(raw.target_groups.unwrap_or_default())?;
    let declared = target_groups
        .iter()
        .map(|g| g.name.clone())
        .collect::<BTreeSet<_>>();

    let raw_constraints = raw
        .constraints
        .ok_or_else(|| MalformedIntentError::MissingField("constraints".to_string()))?;
    let mut constraints = Vec::with_capacity(raw_constraints.len());
    for (idx, c) in raw_constraints.into_iter().enumerate() {
        constraints.push(build_constraint(idx, c, &declared)?);
    }

    let raw_rules = match raw.temporal_rules {
        None => Vec::new(),
        Some(RawTemporalRules::One(rule)) => vec![rule],
        Some(RawTemporalRules::Many(rules)) => rules,
    };
    let mut temporal_rules = Vec::with_capacity(raw_rules.len());
    for (idx, rule) in raw_rules.into_iter().enumerate() {
        temporal_rules.push(build_temporal_rule(idx, rule)?);
    }

    let effective_period = raw.effective_period.map(build_period).transpose()?;
    let severity_bands = raw.severity_bands.map(build_bands).transpose()?;

    let intent = PolicyIntent::with_fingerprint(
        policy_domain,
        target_groups,
        constraints,
        temporal_rules,
        effective_period,
        severity_bands,
    );
    debug!(
        "accepted {} intent with {} groups, {} constraints, {} temporal rules (fingerprint {})",
        intent.policy_domain(),
        intent.target_groups().len(),
        intent.constraints().len(),
        intent.temporal_rules().len(),
        intent.fingerprint()
    );
    Ok(intent)
}

pub fn load_intent_str(text: &str) -> Result<PolicyIntent, MalformedIntentError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| MalformedIntentError::Shape(e.to_string()))?;
    load_intent(&value)
}

fn build_groups(raw: Vec<RawTargetGroup>) -> Result<Vec<TargetGroup>, MalformedIntentError> {
    let mut seen = BTreeSet::new();
    let mut groups = Vec::with_capacity(raw.len());
    for (idx, group) in raw.into_iter().enumerate() {
        let name = group
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MalformedIntentError::MissingField(format!("target_groups[{idx}].name")))?;
        if name == "*" || name.eq_ignore_ascii_case("all") {
            return Err(MalformedIntentError::ReservedGroupName(name));
        }
        if !seen.insert(name.clone()) {
            return Err(MalformedIntentError::DuplicateGroup(name));
        }
        let criteria = group.criteria.ok_or_else(|| {
            MalformedIntentError::MissingField(format!("target_groups[{idx}].criteria"))
        })?;
        let criteria = compile_criteria(criteria).map_err(|source| {
            MalformedIntentError::InvalidCriteria {
                group: name.clone(),
                source,
            }
        })?;
        groups.push(TargetGroup { name, criteria });
    }
    Ok(groups)
}

fn compile_criteria(raw: RawCriteria) -> Result<Predicate, PredicateParseError> {
    match raw {
        RawCriteria::Expression(expr) => Predicate::parse(&expr),
        RawCriteria::Clauses(items) => {
            let mut clauses = Vec::new();
            for item in &items {
                clauses.extend(Predicate::parse(item)?.clauses().iter().cloned());
            }
            Ok(Predicate::new(clauses))
        }
        RawCriteria::Ranges(ranges) => {
            let mut clauses = Vec::new();
            for (field, range) in ranges {
                let key = MetricKey::from_str(&field)?;
                match range {
                    RawRange::Bounds(RawBounds { min: None, max: None }) => {
                        return Err(PredicateParseError::Empty)
                    }
                    RawRange::Bounds(RawBounds { min, max }) => {
                        if let Some(min) = min {
                            clauses.push(Clause::new(key, PredicateOp::Ge, min));
                        }
                        if let Some(max) = max {
                            clauses.push(Clause::new(key, PredicateOp::Le, max));
                        }
                    }
                    RawRange::Exact(value) => clauses.push(Clause::new(key, PredicateOp::Eq, value)),
                }
            }
            Ok(Predicate::new(clauses))
        }
    }
}

fn build_constraint(
    idx: usize,
    raw: RawConstraint,
    declared: &BTreeSet<String>,
) -> Result<Constraint, MalformedIntentError> {
    let location = format!("constraints[{idx}]");
    let missing = |field: &str| MalformedIntentError::MissingField(format!("{location}.{field}"));

    let type_name = raw.constraint_type.ok_or_else(|| missing("type"))?;
    let constraint_type = ConstraintType::from_str(&type_name).map_err(|_| {
        MalformedIntentError::UnknownConstraintType {
            location: location.clone(),
            name: type_name.clone(),
        }
    })?;

    let metric_name = raw.metric.ok_or_else(|| missing("metric"))?;
    let metric = MetricKey::from_str(&metric_name).map_err(|_| MalformedIntentError::UnknownMetric {
        location: location.clone(),
        name: metric_name.clone(),
    })?;

    let threshold = raw.threshold.ok_or_else(|| missing("threshold"))?;
    if !threshold.is_finite() {
        return Err(MalformedIntentError::InvalidThreshold {
            location,
            value: threshold,
        });
    }

    let comparison = match raw.comparison {
        None => constraint_type.default_comparison(),
        Some(op) => Comparison::from_str(&op).map_err(|_| {
            MalformedIntentError::UnsupportedOperator {
                location: location.clone(),
                operator: op.clone(),
            }
        })?,
    };

    let applies_to = match raw.applies_to.as_deref().map(str::trim) {
        None | Some("*") => AppliesTo::All,
        Some(name) if name.eq_ignore_ascii_case("all") => AppliesTo::All,
        Some(name) if declared.contains(name) => AppliesTo::Group(name.to_string()),
        Some(name) => {
            return Err(MalformedIntentError::UnknownGroup {
                location,
                group: name.to_string(),
            })
        }
    };

    Ok(Constraint {
        constraint_type,
        metric,
        threshold,
        comparison,
        applies_to,
        description: raw.description,
    })
}

fn build_temporal_rule(
    idx: usize,
    raw: RawTemporalRule,
) -> Result<TemporalRule, MalformedIntentError> {
    let location = format!("temporal_rules[{idx}]");
    let missing = |field: &str| MalformedIntentError::MissingField(format!("{location}.{field}"));

    let metric_name = raw.metric.ok_or_else(|| missing("metric"))?;
    let metric = MetricKey::from_str(&metric_name).map_err(|_| MalformedIntentError::UnknownMetric {
        location: location.clone(),
        name: metric_name.clone(),
    })?;

    let max_variance = raw.max_variance.ok_or_else(|| missing("max_variance"))?;
    if !max_variance.is_finite() || max_variance < 0.0 {
        return Err(MalformedIntentError::InvalidThreshold {
            location,
            value: max_variance,
        });
    }

    let window = raw.window_months.ok_or_else(|| missing("window_months"))?;
    if window < 1 {
        return Err(MalformedIntentError::InvalidWindow {
            location,
            value: window,
        });
    }

    Ok(TemporalRule {
        metric,
        max_variance,
        window_months: usize::try_from(window).unwrap_or(usize::MAX),
    })
}

fn build_period(raw: RawPeriod) -> Result<EffectivePeriod, MalformedIntentError> {
    let parse = |value: Option<String>| {
        value
            .map(|v| Month::from_str(&v))
            .transpose()
            .map_err(|e| MalformedIntentError::InvalidPeriod(e.to_string()))
    };
    let period = EffectivePeriod {
        from: parse(raw.from)?,
        to: parse(raw.to)?,
    };
    if let (Some(from), Some(to)) = (period.from, period.to) {
        if from > to {
            return Err(MalformedIntentError::InvalidPeriod(format!(
                "from {from} is after to {to}"
            )));
        }
    }
    Ok(period)
}

fn build_bands(raw: RawBands) -> Result<SeverityBands, MalformedIntentError> {
    let bands = SeverityBands {
        low_max: raw.low_max.ok_or_else(|| {
            MalformedIntentError::MissingField("severity_bands.low_max".to_string())
        })?,
        medium_max: raw.medium_max.ok_or_else(|| {
            MalformedIntentError::MissingField("severity_bands.medium_max".to_string())
        })?,
    };
    bands
        .validate()
        .map_err(MalformedIntentError::InvalidSeverityBands)?;
    Ok(bands)
}
