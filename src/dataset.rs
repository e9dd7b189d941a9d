use std::sync::Arc;

use crate::schema::{CanonicalRecord, Schema};

/// A cleaned snapshot: schema, records and the fingerprint of the source payload.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub schema: Arc<Schema>,
    pub records: Vec<CanonicalRecord>,
    pub fingerprint: String,
    pub dropped: usize,
}

impl Dataset {
    pub fn new(schema: Arc<Schema>, records: Vec<CanonicalRecord>, fingerprint: impl Into<String>) -> Self {
        Self {
            schema,
            records,
            fingerprint: fingerprint.into(),
            dropped: 0,
        }
    }

    pub fn empty(schema: Arc<Schema>) -> Self {
        Self::new(schema, Vec::new(), "empty")
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Subset sharing the schema; `tag` is appended to the fingerprint so the
    /// subset gets its own cache identity.
    pub fn filtered(&self, tag: &str, keep: impl Fn(&CanonicalRecord) -> bool) -> Dataset {
        Dataset {
            schema: Arc::clone(&self.schema),
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
            fingerprint: format!("{}|{tag}", self.fingerprint),
            dropped: self.dropped,
        }
    }

    /// Distinct non-empty values of a text field, sorted.
    pub fn distinct_text(&self, field: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .records
            .iter()
            .filter_map(|r| r.text(field))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}
