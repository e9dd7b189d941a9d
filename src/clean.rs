use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SchemaError;
use crate::raw::RawRecord;
use crate::schema::{CanonicalRecord, FieldSpec, FieldType, Schema, Value};

const NULL_MARKERS: &[&str] = &["", "nan", "null", "none", "n/a", "na", "-", "--"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    Blank,
    MissingRequired { field: String },
    Unparseable { field: String, raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedRow {
    pub row: usize,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CleanOutput {
    pub records: Vec<CanonicalRecord>,
    pub dropped: Vec<DroppedRow>,
    /// Cells of nullable fields that failed to parse and became `Null`/default.
    pub coerced: usize,
}

impl CleanOutput {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Maps raw rows onto a schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cleaner;

impl Cleaner {
    pub fn clean(records: &[RawRecord], schema: &Schema) -> Result<CleanOutput, SchemaError> {
        let mut out = CleanOutput::default();
        if records.is_empty() {
            return Ok(out);
        }

        let mapping = resolve_columns(records, schema)?;

        'rows: for (row_idx, raw) in records.iter().enumerate() {
            if raw.is_blank() {
                out.dropped.push(DroppedRow {
                    row: row_idx,
                    reason: DropReason::Blank,
                });
                continue;
            }

            let cells = normalized_cells(raw);
            let mut record = CanonicalRecord::new();
            for (spec, column) in schema.fields().iter().zip(&mapping) {
                let cell = column.as_deref().and_then(|c| cells.get(c).copied());
                match parse_field(spec, cell) {
                    Parsed::Value(value) => record.set(spec.name.clone(), value),
                    Parsed::Missing => match fallback(spec) {
                        Some(value) => record.set(spec.name.clone(), value),
                        None => {
                            out.dropped.push(DroppedRow {
                                row: row_idx,
                                reason: DropReason::MissingRequired {
                                    field: spec.name.clone(),
                                },
                            });
                            continue 'rows;
                        }
                    },
                    Parsed::Invalid(raw_text) => match fallback(spec) {
                        Some(value) => {
                            out.coerced += 1;
                            record.set(spec.name.clone(), value);
                        }
                        None => {
                            out.dropped.push(DroppedRow {
                                row: row_idx,
                                reason: DropReason::Unparseable {
                                    field: spec.name.clone(),
                                    raw: raw_text,
                                },
                            });
                            continue 'rows;
                        }
                    },
                }
            }
            out.records.push(record);
        }

        if !out.dropped.is_empty() {
            info!(
                schema = %schema.name,
                kept = out.records.len(),
                dropped = out.dropped.len(),
                "cleaner dropped malformed rows"
            );
        }
        debug!(schema = %schema.name, coerced = out.coerced, "clean finished");
        Ok(out)
    }
}

/// Normalized header form: trimmed, inner whitespace collapsed, lowercase.
pub fn normalize_column(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A row's cells keyed by normalized column; the first duplicate wins.
fn normalized_cells(raw: &RawRecord) -> HashMap<String, &str> {
    let mut cells = HashMap::with_capacity(raw.len());
    for (column, value) in raw.cells() {
        cells.entry(normalize_column(column)).or_insert(value);
    }
    cells
}

/// Normalized column name for each schema field, or `None` when absent.
fn resolve_columns(
    records: &[RawRecord],
    schema: &Schema,
) -> Result<Vec<Option<String>>, SchemaError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ordered: Vec<String> = Vec::new();
    for record in records {
        for column in record.columns() {
            let key = normalize_column(column);
            if key.is_empty() || !seen.insert(key) {
                continue;
            }
            ordered.push(column.to_string());
        }
    }

    let mut mapping = Vec::with_capacity(schema.fields().len());
    for spec in schema.fields() {
        let column = spec
            .names()
            .map(normalize_column)
            .find(|name| seen.contains(name));
        if column.is_none() && spec.is_required() {
            return Err(SchemaError::MissingField {
                field: spec.name.clone(),
                available: ordered.join(", "),
            });
        }
        mapping.push(column);
    }
    Ok(mapping)
}

enum Parsed {
    Value(Value),
    Missing,
    Invalid(String),
}

fn fallback(spec: &FieldSpec) -> Option<Value> {
    if let Some(default) = &spec.default {
        return Some(default.clone());
    }
    if spec.nullable {
        return Some(Value::Null);
    }
    None
}

fn parse_field(spec: &FieldSpec, cell: Option<&str>) -> Parsed {
    let Some(raw) = cell else {
        return Parsed::Missing;
    };
    let trimmed = raw.trim();
    if is_null_marker(trimmed) {
        return Parsed::Missing;
    }

    let parsed = match spec.field_type {
        FieldType::Text => Some(Value::Text(trimmed.to_string())),
        FieldType::Int => parse_int(trimmed).map(|v| Value::Int(clamp_int(v, spec.clamp))),
        FieldType::Float => parse_float(trimmed).map(|v| Value::Float(clamp_float(v, spec.clamp))),
        FieldType::Date => parse_date(trimmed).map(Value::Date),
    };
    match parsed {
        Some(value) => Parsed::Value(value),
        None => Parsed::Invalid(trimmed.to_string()),
    }
}

fn is_null_marker(raw: &str) -> bool {
    NULL_MARKERS.iter().any(|m| raw.eq_ignore_ascii_case(m))
}

pub fn parse_float(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && *c != '_' && !c.is_whitespace())
        .collect();
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}

/// Integers also accept integral floats ("3.0").
pub fn parse_int(raw: &str) -> Option<i64> {
    let value = parse_float(raw)?;
    if value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return None;
    }
    Some(value as i64)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.split(['T', ' ']).next().unwrap_or(raw);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

fn clamp_float(value: f64, range: Option<(f64, f64)>) -> f64 {
    match range {
        Some((lo, hi)) => value.clamp(lo, hi),
        None => value,
    }
}

/// Bounds are rounded inwards; `as` saturates out-of-range floats.
fn clamp_int(value: i64, range: Option<(f64, f64)>) -> i64 {
    match range {
        Some((lo, hi)) => {
            let (lo, hi) = (lo.ceil() as i64, hi.floor() as i64);
            if lo <= hi { value.clamp(lo, hi) } else { value }
        }
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goals_schema() -> Schema {
        Schema::new(
            "goals",
            vec![
                FieldSpec::required("player", FieldType::Text),
                FieldSpec::required("goals", FieldType::Int),
            ],
        )
        .unwrap()
    }

    #[test]
    fn unparseable_required_number_drops_the_row() {
        let rows = vec![
            RawRecord::from_pairs([("player", "A"), ("goals", "3")]),
            RawRecord::from_pairs([("player", "B"), ("goals", "bad")]),
        ];
        let out = Cleaner::clean(&rows, &goals_schema()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].text("player"), Some("A"));
        assert_eq!(out.records[0].get("goals"), Some(&Value::Int(3)));
        assert_eq!(out.dropped_count(), 1);
        assert_eq!(
            out.dropped[0].reason,
            DropReason::Unparseable {
                field: "goals".to_string(),
                raw: "bad".to_string()
            }
        );
    }

    #[test]
    fn unparseable_nullable_number_becomes_null() {
        let schema = Schema::new(
            "s",
            vec![
                FieldSpec::required("player", FieldType::Text),
                FieldSpec::nullable("xg", FieldType::Float),
            ],
        )
        .unwrap();
        let rows = vec![RawRecord::from_pairs([("Player", "A"), ("xG", "n/a?")])];
        let out = Cleaner::clean(&rows, &schema).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].get("xg"), Some(&Value::Null));
        assert_eq!(out.coerced, 1);
        assert_eq!(out.dropped_count(), 0);
    }

    #[test]
    fn missing_required_column_is_a_schema_error() {
        let rows = vec![RawRecord::from_pairs([("player", "A")])];
        let err = Cleaner::clean(&rows, &goals_schema()).unwrap_err();
        assert!(matches!(err, SchemaError::MissingField { ref field, .. } if field == "goals"));
    }

    #[test]
    fn header_matching_is_whitespace_and_case_insensitive() {
        let schema = Schema::new(
            "s",
            vec![
                FieldSpec::required("team", FieldType::Text).alias("Team within selected timeframe"),
                FieldSpec::required("minutes", FieldType::Int).alias("Minutes played"),
            ],
        )
        .unwrap();
        let rows = vec![RawRecord::from_pairs([
            ("  team WITHIN selected   timeframe ", "Eastern"),
            ("Minutes played", "1,260"),
        ])];
        let out = Cleaner::clean(&rows, &schema).unwrap();
        assert_eq!(out.records[0].text("team"), Some("Eastern"));
        assert_eq!(out.records[0].get("minutes"), Some(&Value::Int(1260)));
    }

    #[test]
    fn blank_rows_are_dropped_and_counted() {
        let rows = vec![
            RawRecord::from_pairs([("player", "A"), ("goals", "1")]),
            RawRecord::from_pairs([("player", " "), ("goals", "")]),
        ];
        let out = Cleaner::clean(&rows, &goals_schema()).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.dropped[0], DroppedRow { row: 1, reason: DropReason::Blank });
    }

    #[test]
    fn defaults_and_clamps_apply() {
        let schema = Schema::new(
            "s",
            vec![
                FieldSpec::required("player", FieldType::Text),
                FieldSpec::required("pass_pct", FieldType::Float)
                    .clamped(0.0, 100.0)
                    .with_default(Value::Float(0.0)),
                FieldSpec::required("goals", FieldType::Int).clamped(0.0, f64::MAX),
            ],
        )
        .unwrap();
        let rows = vec![RawRecord::from_pairs([
            ("player", "A"),
            ("pass_pct", "104.2%"),
            ("goals", "-2"),
        ])];
        let out = Cleaner::clean(&rows, &schema).unwrap();
        assert_eq!(out.records[0].number("pass_pct"), Some(100.0));
        assert_eq!(out.records[0].get("goals"), Some(&Value::Int(0)));

        let rows = vec![RawRecord::from_pairs([("player", "B"), ("goals", "1")])];
        let out = Cleaner::clean(&rows, &schema).unwrap();
        assert_eq!(out.records[0].number("pass_pct"), Some(0.0));
    }

    #[test]
    fn number_parsing_rules() {
        assert_eq!(parse_int("3.0"), Some(3));
        assert_eq!(parse_int("3.5"), None);
        assert_eq!(parse_float("12.5%"), Some(12.5));
        assert_eq!(parse_float("inf"), None);
        assert_eq!(
            parse_date("03/02/2024"),
            NaiveDate::from_ymd_opt(2024, 2, 3)
        );
        assert_eq!(
            parse_date("2024-02-03T10:00:00"),
            NaiveDate::from_ymd_opt(2024, 2, 3)
        );
        assert_eq!(parse_date("17.08.2024"), NaiveDate::from_ymd_opt(2024, 8, 17));
        assert_eq!(parse_date("31.02.2024"), None);
    }

    #[test]
    fn dotted_dates_fill_a_date_field() {
        let schema = Schema::new(
            "injuries",
            vec![
                FieldSpec::required("player", FieldType::Text),
                FieldSpec::required("injury_date", FieldType::Date),
            ],
        )
        .unwrap();
        let rows = vec![RawRecord::from_pairs([
            ("Player", "A"),
            ("Injury_Date", "05.11.2024"),
        ])];
        let out = Cleaner::clean(&rows, &schema).unwrap();
        assert_eq!(
            out.records[0].date("injury_date"),
            NaiveDate::from_ymd_opt(2024, 11, 5)
        );
    }

    #[test]
    fn rows_with_differently_cased_keys_are_read() {
        let rows = vec![
            RawRecord::from_pairs([("Player", "A"), ("Goals", "3")]),
            RawRecord::from_pairs([("player", "B"), ("goals", "4")]),
            RawRecord::from_pairs([(" PLAYER ", "C"), ("GOALS", "5")]),
        ];
        let out = Cleaner::clean(&rows, &goals_schema()).unwrap();
        assert_eq!(out.dropped_count(), 0);
        let goals: Vec<_> = out.records.iter().map(|r| r.get("goals").cloned()).collect();
        assert_eq!(
            goals,
            vec![Some(Value::Int(3)), Some(Value::Int(4)), Some(Value::Int(5))]
        );
    }

    #[test]
    fn integer_clamp_keeps_precision() {
        let big = (1_i64 << 53) + 1;
        assert_eq!(clamp_int(big, Some((0.0, f64::MAX))), big);
        assert_eq!(clamp_int(-4, Some((0.5, 10.0))), 1);
        assert_eq!(clamp_int(12, Some((0.0, 10.9))), 10);
        assert_eq!(clamp_int(i64::MIN, Some((f64::MIN, 0.0))), i64::MIN);
    }

    #[test]
    fn empty_input_is_empty_output() {
        let out = Cleaner::clean(&[], &goals_schema()).unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.dropped_count(), 0);
    }
}
