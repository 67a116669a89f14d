pub mod csv;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::MetricKey;

/// Calendar month in `YYYY-MM` form. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month {
    year: i32,
    month: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid month `{0}`, expected YYYY-MM")]
pub struct MonthParseError(pub String);

impl Month {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthParseError> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .filter(|_| (0..=9999).contains(&year))
            .map(|_| Self { year, month })
            .ok_or_else(|| MonthParseError(format!("{year}-{month}")))
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl FromStr for Month {
    type Err = MonthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || MonthParseError(s.to_string());
        let (year, month) = trimmed.split_once('-').ok_or_else(err)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(err());
        }
        let year = year.parse::<i32>().map_err(|_| err())?;
        let month = month.parse::<u32>().map_err(|_| err())?;
        Month::new(year, month).map_err(|_| err())
    }
}

impl TryFrom<String> for Month {
    type Error = MonthParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Month> for String {
    fn from(value: Month) -> Self {
        value.to_string()
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Raw cell value. Text is kept so detection can report it verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Text(String),
}

impl Display for MetricValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Numeric(v) => write!(f, "{v}"),
            MetricValue::Text(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldIssue {
    Missing,
    NonNumeric(String),
}

impl Display for FieldIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldIssue::Missing => write!(f, "is missing"),
            FieldIssue::NonNumeric(raw) => write!(f, "is not numeric (`{raw}`)"),
        }
    }
}

/// One district in one month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImplementationRecord {
    pub district_id: String,
    pub district_name: String,
    pub month: Month,
    #[serde(flatten)]
    pub metrics: BTreeMap<MetricKey, MetricValue>,
}

impl ImplementationRecord {
    pub fn new(
        district_id: impl Into<String>,
        district_name: impl Into<String>,
        month: Month,
    ) -> Self {
        Self {
            district_id: district_id.into(),
            district_name: district_name.into(),
            month,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: MetricKey, value: f64) -> Self {
        self.metrics.insert(key, MetricValue::Numeric(value));
        self
    }

    pub fn with_text(mut self, key: MetricKey, raw: impl Into<String>) -> Self {
        self.metrics.insert(key, MetricValue::Text(raw.into()));
        self
    }

    pub fn metric_value(&self, key: MetricKey) -> Option<&MetricValue> {
        self.metrics.get(&key)
    }

    pub fn numeric_metric(&self, key: MetricKey) -> Option<f64> {
        self.require_numeric(key).ok()
    }

    /// NaN and infinities count as non-numeric.
    pub fn require_numeric(&self, key: MetricKey) -> Result<f64, FieldIssue> {
        match self.metrics.get(&key) {
            None => Err(FieldIssue::Missing),
            Some(MetricValue::Numeric(v)) if v.is_finite() => Ok(*v),
            Some(MetricValue::Numeric(v)) => Err(FieldIssue::NonNumeric(v.to_string())),
            Some(MetricValue::Text(raw)) => Err(FieldIssue::NonNumeric(raw.clone())),
        }
    }
}

/// Groups records by district id (ascending) and orders each series by month.
/// Records sharing a district and month keep their input order.
pub fn group_by_district<'a>(
    records: impl IntoIterator<Item = &'a ImplementationRecord>,
) -> BTreeMap<&'a str, Vec<&'a ImplementationRecord>> {
    let mut series: BTreeMap<&str, Vec<&ImplementationRecord>> = BTreeMap::new();
    for record in records {
        series
            .entry(record.district_id.as_str())
            .or_default()
            .push(record);
    }
    for history in series.values_mut() {
        history.sort_by_key(|r| r.month);
    }
    series
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::intent::MetricKey;

    use super::{group_by_district, FieldIssue, ImplementationRecord, Month};

    #[test]
    fn month_parses_and_orders_chronologically() {
        let jan: Month = "2024-01".parse().expect("parse");
        let dec: Month = "2023-12".parse().expect("parse");
        assert!(dec < jan);
        assert_eq!(jan.to_string(), "2024-01");
        assert!("2024-13".parse::<Month>().is_err());
        assert!("2024-1".parse::<Month>().is_err());
        assert!("January".parse::<Month>().is_err());
    }

    #[test]
    fn record_deserializes_from_flat_json() {
        let record: ImplementationRecord = serde_json::from_value(json!({
            "district_id": "D01",
            "district_name": "Alpha",
            "month": "2024-03",
            "coverage_percentage": 50.0,
            "fund_utilization": "n/a"
        }))
        .expect("record");
        assert_eq!(
            record.require_numeric(MetricKey::CoveragePercentage),
            Ok(50.0)
        );
        assert_eq!(
            record.require_numeric(MetricKey::FundUtilization),
            Err(FieldIssue::NonNumeric("n/a".to_string()))
        );
        assert_eq!(
            record.require_numeric(MetricKey::LiteracyRate),
            Err(FieldIssue::Missing)
        );
    }

    #[test]
    fn non_finite_values_are_not_numeric() {
        let record = ImplementationRecord::new("D01", "Alpha", Month::new(2024, 1).unwrap())
            .with_metric(MetricKey::Population, f64::NAN);
        assert!(matches!(
            record.require_numeric(MetricKey::Population),
            Err(FieldIssue::NonNumeric(_))
        ));
    }

    #[test]
    fn groups_sort_each_district_by_month() {
        let records = vec![
            ImplementationRecord::new("D02", "Beta", "2024-02".parse().unwrap()),
            ImplementationRecord::new("D01", "Alpha", "2024-03".parse().unwrap()),
            ImplementationRecord::new("D01", "Alpha", "2024-01".parse().unwrap()),
        ];
        let grouped = group_by_district(&records);
        let ids = grouped.keys().copied().collect::<Vec<_>>();
        assert_eq!(ids, vec!["D01", "D02"]);
        let months = grouped["D01"]
            .iter()
            .map(|r| r.month.to_string())
            .collect::<Vec<_>>();
        assert_eq!(months, vec!["2024-01", "2024-03"]);
    }
}
