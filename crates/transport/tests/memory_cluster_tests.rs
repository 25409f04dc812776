//! Loopback cluster behaviour as seen through the transport traits
//!
//! Covers:
//! - BEGIN / RUN / PULL / COMMIT round trips and bookmark issuance
//! - Rollback discarding staged writes
//! - Bookmark validation
//! - Leader election and write rejection
//! - Fault injection and broken connections
//! - Cancellation of a slow pull

use arbor_core::{AccessMode, Bookmarks, DriverError, Query, Value};
use arbor_transport::memory::{FaultPoint, MemoryCluster, QueryOutput};
use arbor_transport::{AuthToken, BeginRequest, CancelToken, Connection, Connector};
use std::thread;
use std::time::Duration;

/// Handler understanding two query shapes:
/// - `SET <key>` with `$value`
/// - `GET <prefix>` returning `key, value` rows
fn kv_cluster(members: usize) -> MemoryCluster {
    MemoryCluster::builder()
        .members(members)
        .handler(|query, tx| {
            let text = query.text();
            if let Some(key) = text.strip_prefix("SET ") {
                let value = query.get_param("value").cloned().unwrap_or(Value::Null);
                tx.put(key, value);
                Ok(QueryOutput::empty())
            } else if let Some(prefix) = text.strip_prefix("GET ") {
                let rows = tx
                    .scan_prefix(prefix)
                    .into_iter()
                    .map(|(k, v)| vec![Value::from(k), v]);
                Ok(QueryOutput::with_keys(["key", "value"]).rows(rows))
            } else {
                Err(DriverError::database("Statement.SyntaxError", text))
            }
        })
        .build()
}

fn write_request() -> BeginRequest {
    BeginRequest {
        access_mode: AccessMode::Write,
        ..Default::default()
    }
}

fn connect_leader(cluster: &MemoryCluster) -> Box<dyn Connection> {
    cluster
        .connector()
        .connect(&cluster.leader(), &AuthToken::none())
        .unwrap()
}

#[test]
fn test_commit_applies_writes_and_issues_bookmark() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();

    conn.begin(&write_request()).unwrap();
    conn.run(&Query::new("SET a").param("value", 1), &cancel).unwrap();
    conn.run(&Query::new("SET b").param("value", 2), &cancel).unwrap();
    assert!(cluster.get("a").is_none(), "uncommitted writes must be invisible");

    let bookmark = conn.commit().unwrap();
    assert_eq!(bookmark.as_deref(), Some("mem:1"));
    assert_eq!(cluster.get("a"), Some(Value::Int(1)));
    assert_eq!(cluster.get("b"), Some(Value::Int(2)));
    assert_eq!(cluster.stats().commits, 1);
}

#[test]
fn test_rollback_discards_writes() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();

    conn.begin(&write_request()).unwrap();
    conn.run(&Query::new("SET a").param("value", 1), &cancel).unwrap();
    conn.rollback().unwrap();

    assert!(cluster.is_empty());
    assert_eq!(cluster.version(), 0);
    assert_eq!(cluster.stats().rollbacks, 1);
}

#[test]
fn test_pull_in_batches() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();

    conn.begin(&write_request()).unwrap();
    for i in 0..5 {
        conn.run(&Query::new(format!("SET k{}", i)).param("value", i), &cancel)
            .unwrap();
    }
    let run = conn.run(&Query::new("GET k"), &cancel).unwrap();
    assert_eq!(run.keys, vec!["key", "value"]);

    let first = conn.pull(run.qid, 2, &cancel).unwrap();
    assert_eq!(first.records.len(), 2);
    assert!(first.has_more);
    assert!(first.summary.is_none());

    let rest = conn.pull(run.qid, 10, &cancel).unwrap();
    assert_eq!(rest.records.len(), 3);
    assert!(!rest.has_more);
    let summary = rest.summary.unwrap();
    assert_eq!(summary.query_text, "GET k");
    assert_eq!(summary.server, cluster.leader().to_string());
}

#[test]
fn test_unknown_bookmark_rejected() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);

    let request = BeginRequest {
        bookmarks: Bookmarks::from_tokens(["mem:42"]),
        ..write_request()
    };
    let err = conn.begin(&request).unwrap_err();
    assert!(matches!(err, DriverError::Database { ref code, .. } if code == "Transaction.InvalidBookmark"));
}

#[test]
fn test_writes_rejected_after_leader_moves() {
    let cluster = kv_cluster(3);
    let old_leader = cluster.leader();
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();

    conn.begin(&write_request()).unwrap();
    conn.run(&Query::new("SET a").param("value", 1), &cancel).unwrap();
    cluster.elect(1);

    let err = conn.commit().unwrap_err();
    assert_eq!(
        err,
        DriverError::LeaderSwitch {
            address: old_leader.to_string()
        }
    );
    assert!(cluster.get("a").is_none());

    // New write transactions on the old leader are refused up front
    assert!(matches!(
        conn.begin(&write_request()),
        Err(DriverError::LeaderSwitch { .. })
    ));
}

#[test]
fn test_routing_table_tracks_leader() {
    let cluster = kv_cluster(3);
    let connector = cluster.connector();

    let table = connector.fetch_routing_table(Some("neo"), &AuthToken::none()).unwrap();
    assert_eq!(table.writers, vec![cluster.members()[0].clone()]);
    assert_eq!(table.readers.len(), 2);
    assert_eq!(table.database.as_deref(), Some("neo"));

    cluster.elect(2);
    let table = connector.fetch_routing_table(None, &AuthToken::none()).unwrap();
    assert_eq!(table.writers, vec![cluster.members()[2].clone()]);
    assert!(!table.readers.contains(&cluster.members()[2]));
}

#[test]
fn test_injected_reset_breaks_connection() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();
    cluster.inject(
        FaultPoint::Run,
        DriverError::ConnectionReset {
            address: cluster.leader().to_string(),
            reason: "injected".into(),
        },
    );

    conn.begin(&write_request()).unwrap();
    let err = conn.run(&Query::new("SET a"), &cancel).unwrap_err();
    assert!(err.is_connection_fatal());
    assert!(conn.is_broken());
    assert!(conn.rollback().is_err());
}

#[test]
fn test_injected_transient_fires_once() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();
    cluster.inject(FaultPoint::Run, DriverError::transient("Transaction.Outdated", "x"));

    conn.begin(&write_request()).unwrap();
    assert!(conn.run(&Query::new("SET a"), &cancel).is_err());
    assert!(conn.run(&Query::new("SET a"), &cancel).is_ok());
    assert!(!conn.is_broken());
}

#[test]
fn test_unreachable_member() {
    let cluster = kv_cluster(2);
    let target = cluster.members()[1].clone();
    cluster.set_down(&target, true);
    let err = cluster
        .connector()
        .connect(&target, &AuthToken::none())
        .err()
        .unwrap();
    assert!(matches!(err, DriverError::ConnectionFailed { .. }));
    assert!(err.is_retryable());
}

#[test]
fn test_cancel_interrupts_slow_pull() {
    let cluster = kv_cluster(1);
    let mut conn = connect_leader(&cluster);
    let cancel = CancelToken::new();

    conn.begin(&write_request()).unwrap();
    let run = conn.run(&Query::new("GET x"), &cancel).unwrap();
    cluster.set_pull_latency(Duration::from_secs(30));

    let canceller = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        canceller.cancel();
    });

    let err = conn.pull(run.qid, 10, &cancel).unwrap_err();
    handle.join().unwrap();
    assert_eq!(err, DriverError::Interrupted);
    assert!(conn.is_broken());
}
