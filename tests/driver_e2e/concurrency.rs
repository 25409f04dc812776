//! Many sessions over one driver

use super::*;
use arbor::{AccessMode, SessionConfig};
use std::thread;

#[test]
fn test_parallel_sessions_share_a_small_pool() {
    let cluster = cluster(1);
    let mut config = DriverConfig::default();
    config.pool.max_size_per_address = 2;
    let (driver, _clock) = driver_with(&cluster, config);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let driver = driver.clone();
            thread::spawn(move || {
                let mut session = driver.session(SessionConfig::new());
                for i in 0..5 {
                    let key = format!("w{}:{}", worker, i);
                    session
                        .execute_write(|tx| tx.run(set(&key, i)).map(drop))
                        .unwrap();
                }
                session.last_bookmarks().len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 5, "every commit adds a bookmark");
    }

    assert_eq!(cluster.len(), 40);
    assert_eq!(cluster.stats().commits, 40);
    assert!(cluster.stats().connections_opened <= 2);
    let leader = cluster.leader();
    assert_eq!(driver.pool().in_use(&leader), 0);
    assert!(driver.pool().idle(&leader) <= 2);
}

#[test]
fn test_readers_chained_to_parallel_writers() {
    let cluster = cluster(3);
    let (driver, _clock) = driver_with(&cluster, DriverConfig::default());

    let writers: Vec<_> = (0..4)
        .map(|worker| {
            let driver = driver.clone();
            thread::spawn(move || {
                let mut session = driver.session(SessionConfig::new());
                session
                    .execute_write(|tx| tx.run(set(&format!("doc:{}", worker), "v")).map(drop))
                    .unwrap();
                session.last_bookmarks()
            })
        })
        .collect();

    let bookmarks = writers
        .into_iter()
        .map(|h| h.join().unwrap())
        .fold(arbor::Bookmarks::empty(), |acc, b| acc.merge(&b));
    assert_eq!(bookmarks.len(), 4);

    let mut reader = driver.session(
        SessionConfig::new()
            .with_access_mode(AccessMode::Read)
            .with_bookmarks(bookmarks.clone()),
    );
    let count = reader
        .execute_read(|tx| Ok(tx.run("GET doc:")?.count()))
        .unwrap();
    assert_eq!(count, 4);

    let begin = cluster.begins().pop().unwrap();
    assert_eq!(begin.request.bookmarks, bookmarks);
}
