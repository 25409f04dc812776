//! Membership and leadership changes under a live driver

use super::*;
use arbor::{SessionConfig, TransactionState};
use std::time::Duration;

#[test]
fn test_unreachable_reader_is_forgotten() {
    let cluster = cluster(3);
    let (driver, clock) = driver_with(&cluster, DriverConfig::default());
    let mut session = driver.session(SessionConfig::new());
    session.execute_write(|tx| tx.run(set("a", 1)).map(drop)).unwrap();

    let down = cluster.members()[1].clone();
    cluster.set_down(&down, true);

    // Round robin reaches the dead member within two reads
    for _ in 0..2 {
        let records = session
            .execute_read(|tx| tx.run("GET ")?.collect::<DriverResult<Vec<_>>>())
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    let table = driver.routing_table(None).unwrap();
    assert!(!table.readers.contains(&down));
    assert_eq!(clock.sleeps().len(), 1, "one retry after the failed connect");
}

#[test]
fn test_expired_routing_table_follows_new_leader() {
    let cluster = MemoryCluster::builder()
        .members(3)
        .handler(handle)
        .routing_ttl(Duration::from_secs(10))
        .build();
    let (driver, clock) = driver_with(&cluster, DriverConfig::default());
    let mut session = driver.session(SessionConfig::new());
    session.execute_write(|tx| tx.run(set("a", 1)).map(drop)).unwrap();

    cluster.elect(2);
    clock.advance(Duration::from_secs(11));
    session.execute_write(|tx| tx.run(set("b", 2)).map(drop)).unwrap();

    assert!(clock.sleeps().is_empty(), "a fresh table needs no retry");
    assert_eq!(cluster.begins().pop().unwrap().address, cluster.members()[2]);
}

#[test]
fn test_routing_ttl_capped_by_driver_config() {
    let cluster = cluster(3);
    let config = DriverConfig {
        max_routing_ttl_ms: 1_000,
        ..DriverConfig::default()
    };
    let (driver, clock) = driver_with(&cluster, config);
    driver.routing_table(None).unwrap();

    cluster.elect(1);
    clock.advance(Duration::from_secs(2));

    let table = driver.routing_table(None).unwrap();
    assert_eq!(table.writers, vec![cluster.members()[1].clone()]);
}

#[test]
fn test_explicit_commit_after_election_fails_cleanly() {
    let cluster = cluster(3);
    let (driver, clock) = driver_with(&cluster, DriverConfig::default());
    let mut session = driver.session(SessionConfig::new());

    let mut tx = session.begin_transaction().unwrap();
    tx.run(set("a", 1)).unwrap();
    cluster.elect(1);

    let err = tx.commit().unwrap_err();
    assert!(matches!(err, DriverError::LeaderSwitch { .. }));
    assert_eq!(tx.state(), TransactionState::Failed);
    assert!(cluster.is_empty());
    drop(tx);

    // The managed path recovers on its own
    session.execute_write(|tx| tx.run(set("a", 2)).map(drop)).unwrap();
    assert_eq!(cluster.get("a"), Some(Value::Int(2)));
    assert_eq!(clock.sleeps().len(), 1);
}
