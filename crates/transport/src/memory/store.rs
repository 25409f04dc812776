//! Versioned key/value store behind the loopback cluster

use arbor_core::{AccessMode, Value};
use std::collections::BTreeMap;

/// Committed state shared by every member
#[derive(Debug, Default)]
pub(crate) struct Store {
    /// Incremented once per committed write transaction
    pub(crate) version: u64,
    pub(crate) data: BTreeMap<String, Value>,
}

impl Store {
    /// Apply a transaction's staged writes atomically
    ///
    /// Returns the new version; read-only transactions leave it unchanged.
    pub(crate) fn apply(&mut self, writes: BTreeMap<String, Option<Value>>) -> u64 {
        if writes.is_empty() {
            return self.version;
        }
        for (key, value) in writes {
            match value {
                Some(v) => {
                    self.data.insert(key, v);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
        self.version += 1;
        self.version
    }
}

/// What a query handler sees: committed data overlaid with the
/// transaction's own uncommitted writes
pub struct TxView<'a> {
    committed: &'a BTreeMap<String, Value>,
    writes: &'a mut BTreeMap<String, Option<Value>>,
    counters: &'a mut BTreeMap<String, i64>,
    access_mode: AccessMode,
}

impl<'a> TxView<'a> {
    pub(crate) fn new(
        committed: &'a BTreeMap<String, Value>,
        writes: &'a mut BTreeMap<String, Option<Value>>,
        counters: &'a mut BTreeMap<String, i64>,
        access_mode: AccessMode,
    ) -> Self {
        Self {
            committed,
            writes,
            counters,
            access_mode,
        }
    }

    /// Read a key (read-your-writes)
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.writes.get(key) {
            Some(staged) => staged.clone(),
            None => self.committed.get(key).cloned(),
        }
    }

    /// Stage a write
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.writes.insert(key.into(), Some(value.into()));
        *self.counters.entry("writes".to_string()).or_insert(0) += 1;
    }

    /// Stage a delete; returns whether the key was visible
    pub fn delete(&mut self, key: &str) -> bool {
        let existed = self.get(key).is_some();
        self.writes.insert(key.to_string(), None);
        if existed {
            *self.counters.entry("deletes".to_string()).or_insert(0) += 1;
        }
        existed
    }

    /// All visible entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &str) -> Vec<(String, Value)> {
        let mut merged: BTreeMap<String, Value> = self
            .committed
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in self.writes.iter().filter(|(k, _)| k.starts_with(prefix)) {
            match v {
                Some(v) => {
                    merged.insert(k.clone(), v.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        merged.into_iter().collect()
    }

    /// Access mode the transaction was opened with
    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }
}

/// Rows produced by a query handler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub(crate) keys: Vec<String>,
    pub(crate) rows: Vec<Vec<Value>>,
}

impl QueryOutput {
    /// No columns, no rows
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output with the given column names and no rows yet
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Append many rows
    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Value>>) -> Self {
        self.rows.extend(rows);
        self
    }
}
