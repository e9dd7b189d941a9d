use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    Csv,
    Json,
}

impl PayloadFormat {
    /// Guesses the format from a URL or file name, defaulting to CSV.
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if path.to_ascii_lowercase().ends_with(".json") {
            PayloadFormat::Json
        } else {
            PayloadFormat::Csv
        }
    }
}

/// One unprocessed row: (column, text) pairs in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    cells: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.cells.push((column.into(), value.into()));
    }

    /// First cell stored under exactly `column`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, value)| value.trim().is_empty())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

pub fn parse_payload(body: &str, format: PayloadFormat) -> Result<Vec<RawRecord>, String> {
    match format {
        PayloadFormat::Csv => parse_csv(body),
        PayloadFormat::Json => parse_json(body),
    }
}

pub fn parse_csv(body: &str) -> Result<Vec<RawRecord>, String> {
    let body = body.trim_start_matches('\u{feff}');
    if body.trim().is_empty() {
        return Err("empty csv payload".to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(|err| format!("invalid csv header: {err}"))?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err("csv header row is empty".to_string());
    }

    let mut out = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let row = row.map_err(|err| format!("invalid csv row {}: {err}", idx + 1))?;
        out.push(RawRecord::from_pairs(
            headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.clone(), v.to_string())),
        ));
    }
    Ok(out)
}

/// Accepts a top-level array of objects, or an object wrapping one under
/// `data`, `records` or `rows`.
pub fn parse_json(body: &str) -> Result<Vec<RawRecord>, String> {
    let value: Value =
        serde_json::from_str(body.trim()).map_err(|err| format!("invalid json: {err}"))?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(map) => ["data", "records", "rows"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_array()))
            .ok_or_else(|| "json object has no data/records/rows array".to_string())?,
        _ => return Err("json payload is not an array of objects".to_string()),
    };

    let mut out = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            return Err(format!("json row {idx} is not an object"));
        };
        let mut record = RawRecord::new();
        for (key, value) in obj {
            if let Some(text) = json_cell_text(value) {
                record.push(key.clone(), text);
            }
        }
        out.push(record);
    }
    Ok(out)
}

fn json_cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
