//! Fixtures shared by the engine integration tests

#![allow(dead_code)]

use arbor_core::{DriverError, DriverResult, Query, Value};
use arbor_engine::{Driver, ManualClock};
use arbor_transport::memory::{MemoryCluster, QueryOutput, TxView};
use std::sync::Arc;

/// Install a test-friendly subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Key-value handler understanding:
/// - `SET <key>` with `$value`
/// - `GET <prefix>` returning `key, value` rows
/// - `INCR <key>` returning the new value
/// - `RANGE <n>` returning rows `i = 0..n`
/// - anything else fails with a syntax error
pub fn kv_handler(query: &Query, tx: &mut TxView<'_>) -> DriverResult<QueryOutput> {
    let text = query.text();
    let (verb, arg) = text.split_once(' ').unwrap_or((text, ""));
    match verb {
        "SET" => {
            let value = query.get_param("value").cloned().unwrap_or(Value::Null);
            tx.put(arg, value);
            Ok(QueryOutput::empty())
        }
        "GET" => {
            let rows = tx
                .scan_prefix(arg)
                .into_iter()
                .map(|(k, v)| vec![Value::from(k), v]);
            Ok(QueryOutput::with_keys(["key", "value"]).rows(rows))
        }
        "INCR" => {
            let next = tx.get(arg).and_then(|v| v.as_int()).unwrap_or(0) + 1;
            tx.put(arg, next);
            Ok(QueryOutput::with_keys(["value"]).row(vec![Value::Int(next)]))
        }
        "RANGE" => {
            let n: i64 = arg
                .parse()
                .map_err(|_| DriverError::database("Statement.SyntaxError", text))?;
            Ok(QueryOutput::with_keys(["i"]).rows((0..n).map(|i| vec![Value::Int(i)])))
        }
        _ => Err(DriverError::database(
            "Statement.SyntaxError",
            format!("Invalid input '{}'", text),
        )),
    }
}

/// Cluster of `members` servers running [`kv_handler`]
pub fn kv_cluster(members: usize) -> MemoryCluster {
    MemoryCluster::builder().members(members).handler(kv_handler).build()
}

/// Driver over `cluster` whose retry waits go to a [`ManualClock`]
pub fn driver(cluster: &MemoryCluster) -> (Driver, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let driver = Driver::builder(cluster.connector())
        .clock(clock.clone())
        .build()
        .unwrap();
    (driver, clock)
}

/// `SET key` query
pub fn set(key: &str, value: impl Into<Value>) -> Query {
    Query::new(format!("SET {}", key)).param("value", value)
}

/// Transient error as a busy cluster would report it
pub fn transient() -> DriverError {
    DriverError::transient("Transaction.LockClientStopped", "try again")
}
