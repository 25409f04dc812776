//! Driver End-to-End Test Suite
//!
//! Exercises the public `arbor` facade against the in-memory cluster:
//! many sessions sharing one driver, and a cluster whose membership and
//! leadership change underneath it.
//!
//! ## Modules
//!
//! - `concurrency`: parallel sessions, pool limits, causal reads
//! - `failover`: leader elections, unreachable members, routing expiry
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test driver_e2e
//! cargo test --test driver_e2e failover::
//! ```

use arbor::memory::{MemoryCluster, QueryOutput, TxView};
use arbor::{Driver, DriverConfig, DriverError, DriverResult, ManualClock, Query, Value};
use std::sync::Arc;

mod concurrency;
mod failover;

/// Handler for `SET <key>` (with `$value`) and `GET <prefix>`
fn handle(query: &Query, tx: &mut TxView<'_>) -> DriverResult<QueryOutput> {
    let text = query.text();
    if let Some(key) = text.strip_prefix("SET ") {
        tx.put(key, query.get_param("value").cloned().unwrap_or(Value::Null));
        return Ok(QueryOutput::empty());
    }
    if let Some(prefix) = text.strip_prefix("GET ") {
        let rows = tx
            .scan_prefix(prefix)
            .into_iter()
            .map(|(k, v)| vec![Value::from(k), v]);
        return Ok(QueryOutput::with_keys(["key", "value"]).rows(rows));
    }
    Err(DriverError::database("Statement.SyntaxError", text))
}

fn cluster(members: usize) -> MemoryCluster {
    MemoryCluster::builder().members(members).handler(handle).build()
}

fn driver_with(cluster: &MemoryCluster, config: DriverConfig) -> (Driver, Arc<ManualClock>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let clock = Arc::new(ManualClock::new());
    let driver = Driver::builder(cluster.connector())
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    (driver, clock)
}

fn set(key: &str, value: impl Into<Value>) -> Query {
    Query::new(format!("SET {}", key)).param("value", value)
}
