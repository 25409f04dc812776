//! Records and result summaries

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One row of a query result
///
/// Column names are shared between all records of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Create a record; `values` are matched to `keys` by position
    pub fn new(keys: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { keys, values }
    }

    /// Column names
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Values in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of the named column
    pub fn get(&self, key: &str) -> Option<&Value> {
        let idx = self.keys.iter().position(|k| k == key)?;
        self.values.get(idx)
    }

    /// Value at a column position
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the record has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the record into a column-name map
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.keys.iter().cloned().zip(self.values).collect()
    }
}

/// Metadata returned once a result has been fully consumed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Text of the query that produced the result
    pub query_text: String,
    /// Database that served the query
    pub database: Option<String>,
    /// Address of the serving member
    pub server: String,
    /// Update statistics reported by the server (e.g. `"writes"`)
    pub counters: BTreeMap<String, i64>,
    /// Server notifications attached to the result
    pub notifications: Vec<String>,
    /// Time until the first record was available, if reported
    pub result_available_after: Option<Duration>,
}

impl ResultSummary {
    /// A counter value, 0 when absent
    pub fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// True if the server reported any non-zero counter
    pub fn contains_updates(&self) -> bool {
        self.counters.values().any(|v| *v != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Arc<[String]> {
        Arc::from(vec!["name".to_string(), "age".to_string()])
    }

    #[test]
    fn test_record_lookup() {
        let r = Record::new(keys(), vec![Value::from("Alice"), Value::from(33)]);
        assert_eq!(r.get("name"), Some(&Value::from("Alice")));
        assert_eq!(r.value(1), Some(&Value::Int(33)));
        assert!(r.get("missing").is_none());
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_into_map() {
        let r = Record::new(keys(), vec![Value::from("Bob"), Value::Null]);
        let m = r.into_map();
        assert_eq!(m.get("name"), Some(&Value::from("Bob")));
        assert_eq!(m.get("age"), Some(&Value::Null));
    }

    #[test]
    fn test_summary_counters() {
        let mut s = ResultSummary::default();
        assert!(!s.contains_updates());
        s.counters.insert("writes".into(), 2);
        assert_eq!(s.counter("writes"), 2);
        assert_eq!(s.counter("deletes"), 0);
        assert!(s.contains_updates());
    }
}
