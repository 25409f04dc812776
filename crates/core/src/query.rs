//! Query text plus parameters, and per-transaction options

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A query and its parameter map
///
/// ```ignore
/// let q = Query::new("MATCH (p:Person {name: $name}) RETURN p")
///     .param("name", "Alice");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    text: String,
    params: BTreeMap<String, Value>,
}

impl Query {
    /// Create a query without parameters
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add or replace a parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replace all parameters
    pub fn with_params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// The query text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The parameter map
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Look up one parameter
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}

/// Options attached to a single transaction
///
/// - `timeout`: server-side deadline for the transaction
/// - `metadata`: key/value tags the server records for audit and logging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Server-side deadline, `None` uses the server default
    pub timeout: Option<Duration>,
    /// Tags attached to the transaction
    pub metadata: BTreeMap<String, Value>,
}

impl TransactionConfig {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server-side timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
