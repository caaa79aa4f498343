//! Core domain types: harvested records and per-source crawl results.

use std::collections::BTreeMap;

use serde_json::Value;

/// One harvested entity. A tagged JSON tree (null/bool/number/string/array/object).
pub type Record = Value;

// ---------------------------------------------------------------------------
// RecordExt
// ---------------------------------------------------------------------------

/// Path-based accessors over a [`Record`].
///
/// Paths are dot-separated object keys (`"_expandable.homepage"`). Keys that
/// themselves contain dots cannot be addressed this way; use [`RecordExt::field`]
/// for those.
pub trait RecordExt {
    /// Value at a dotted path, if every segment resolves to an object key.
    fn at(&self, path: &str) -> Option<&Value>;

    /// Value under a single top-level key, taken literally.
    fn field(&self, key: &str) -> Option<&Value>;

    /// String at a dotted path.
    fn str_at(&self, path: &str) -> Option<&str> {
        self.at(path).and_then(Value::as_str)
    }

    /// Integer at a dotted path.
    fn i64_at(&self, path: &str) -> Option<i64> {
        self.at(path).and_then(Value::as_i64)
    }

    /// Identifier at `path`, accepting both string and numeric ids.
    fn id_at(&self, path: &str) -> Option<String> {
        match self.at(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Set a top-level field. No-op on non-object records.
    fn set_field(&mut self, key: &str, value: impl Into<Value>);

    /// Remove a top-level field, returning its value.
    fn remove_field(&mut self, key: &str) -> Option<Value>;

    /// Whether the record is an object carrying `key` at the top level.
    fn has_field(&self, key: &str) -> bool {
        self.field(key).is_some()
    }
}

impl RecordExt for Value {
    fn at(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(self, |node, segment| node.as_object()?.get(segment))
    }

    fn field(&self, key: &str) -> Option<&Value> {
        self.as_object()?.get(key)
    }

    fn set_field(&mut self, key: &str, value: impl Into<Value>) {
        if let Some(object) = self.as_object_mut() {
            object.insert(key.to_string(), value.into());
        }
    }

    fn remove_field(&mut self, key: &str) -> Option<Value> {
        self.as_object_mut()?.remove(key)
    }
}

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Everything one source crawler harvested, keyed by collection name.
#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    /// Source that produced the records (e.g. `confluence`).
    pub source: String,
    /// Collection name → records in retrieval order.
    pub collections: BTreeMap<String, Vec<Record>>,
}

impl CrawlResult {
    /// Empty result for `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            collections: BTreeMap::new(),
        }
    }

    /// Add (or replace) a named collection.
    pub fn with_collection(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.collections.insert(name.into(), records);
        self
    }

    /// Records in a collection; empty when the collection is absent.
    pub fn collection(&self, name: &str) -> &[Record] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sum of records across all collections.
    pub fn total_records(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// True iff the union of all collections is empty.
    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}
