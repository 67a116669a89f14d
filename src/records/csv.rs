use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::intent::MetricKey;
use crate::records::{ImplementationRecord, MetricValue, Month};

#[derive(Debug, Clone, Copy)]
enum Column {
    DistrictId,
    DistrictName,
    Month,
    Metric(MetricKey),
    Ignored,
}

fn classify_header(header: &str) -> Column {
    match crate::intent::schema::normalize_name(header).as_str() {
        "district_id" | "district" => Column::DistrictId,
        "district_name" | "name" => Column::DistrictName,
        "month" | "period" => Column::Month,
        other => match MetricKey::from_str(other) {
            Ok(key) => Column::Metric(key),
            Err(_) => Column::Ignored,
        },
    }
}

/// Reads implementation rows from CSV. Empty metric cells are left out of the
/// record; cells that do not parse as numbers are kept as text so detection can
/// report them instead of guessing a value.
pub fn parse_records<R: Read>(reader: R) -> Result<Vec<ImplementationRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = csv_reader
        .headers()
        .context("failed reading CSV header")?
        .iter()
        .map(classify_header)
        .collect::<Vec<_>>();

    if !columns.iter().any(|c| matches!(c, Column::DistrictId)) {
        return Err(anyhow!("CSV header has no district_id column"));
    }
    if !columns.iter().any(|c| matches!(c, Column::Month)) {
        return Err(anyhow!("CSV header has no month column"));
    }
    for (column, header) in columns.iter().zip(csv_reader.headers()?.iter()) {
        if matches!(column, Column::Ignored) {
            debug!("ignoring CSV column `{header}`");
        }
    }

    let mut records = Vec::new();
    for (idx, row) in csv_reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        let row = row.with_context(|| format!("failed reading CSV row at line {line}"))?;
        let mut district_id = None;
        let mut district_name = None;
        let mut month = None;
        let mut metrics = Vec::new();

        for (column, cell) in columns.iter().zip(row.iter()) {
            match column {
                Column::DistrictId if !cell.is_empty() => district_id = Some(cell.to_string()),
                Column::DistrictName if !cell.is_empty() => {
                    district_name = Some(cell.to_string())
                }
                Column::Month => {
                    let parsed = Month::from_str(cell)
                        .with_context(|| format!("bad month at line {line}"))?;
                    month = Some(parsed);
                }
                Column::Metric(key) if !cell.is_empty() => {
                    metrics.push((*key, parse_cell(cell)));
                }
                _ => {}
            }
        }

        let district_id =
            district_id.ok_or_else(|| anyhow!("missing district_id at line {line}"))?;
        let month = month.ok_or_else(|| anyhow!("missing month at line {line}"))?;
        let mut record = ImplementationRecord::new(
            district_id.clone(),
            district_name.unwrap_or(district_id),
            month,
        );
        record.metrics.extend(metrics);
        records.push(record);
    }

    debug!("parsed {} implementation records", records.len());
    Ok(records)
}

pub fn read_records_file(path: &Path) -> Result<Vec<ImplementationRecord>> {
    let file = File::open(path)
        .with_context(|| format!("failed opening records file: {}", path.display()))?;
    parse_records(file).with_context(|| format!("failed parsing records: {}", path.display()))
}

/// Accepts a plain number, optionally with a trailing `%` or comma thousands
/// separators in whole groups of three (`120,000.5`). Anything else stays text.
fn parse_cell(cell: &str) -> MetricValue {
    let number = cell.strip_suffix('%').unwrap_or(cell).trim_end();
    let parsed = if number.contains(',') {
        strip_thousands(number).and_then(|plain| plain.parse::<f64>().ok())
    } else {
        number.parse::<f64>().ok()
    };
    match parsed {
        Some(v) if v.is_finite() => MetricValue::Numeric(v),
        _ => MetricValue::Text(cell.to_string()),
    }
}

fn strip_thousands(number: &str) -> Option<String> {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, fraction) = match unsigned.split_once('.') {
        Some((int_part, fraction)) => (int_part, Some(fraction)),
        None => (unsigned, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let mut groups = int_part.split(',');
    let lead = groups.next()?;
    if !all_digits(lead) || lead.len() > 3 {
        return None;
    }
    let mut plain = format!("{sign}{lead}");
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        plain.push_str(group);
    }
    if let Some(fraction) = fraction {
        if !all_digits(fraction) {
            return None;
        }
        plain.push('.');
        plain.push_str(fraction);
    }
    Some(plain)
}
