//! Connection pool behaviour under reuse, contention and shutdown

use arbor_core::DriverError;
use arbor_pool::{ConnectionPool, PoolConfig};
use arbor_transport::memory::{FaultPoint, MemoryCluster};
use arbor_transport::{AuthToken, BeginRequest, ServerAddress};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn setup(config: PoolConfig) -> (MemoryCluster, ConnectionPool, ServerAddress) {
    let cluster = MemoryCluster::builder().members(2).build();
    let pool = ConnectionPool::new(Arc::new(cluster.connector()), AuthToken::none(), config);
    let address = cluster.leader();
    (cluster, pool, address)
}

#[test]
fn test_idle_connection_is_reused() {
    let (cluster, pool, address) = setup(PoolConfig::new().with_max_size(4));
    for _ in 0..10 {
        let conn = pool.acquire(&address, Duration::ZERO).unwrap();
        assert_eq!(conn.server(), &address);
    }
    assert_eq!(cluster.stats().connections_opened, 1);
    assert_eq!(pool.idle(&address), 1);
}

#[test]
fn test_release_resets_open_transaction() {
    let (cluster, pool, address) = setup(PoolConfig::new());
    {
        let mut conn = pool.acquire(&address, Duration::ZERO).unwrap();
        conn.begin(&BeginRequest::default()).unwrap();
    }
    assert_eq!(cluster.stats().rollbacks, 1);

    // The reused connection accepts a new BEGIN
    let mut conn = pool.acquire(&address, Duration::ZERO).unwrap();
    assert!(conn.begin(&BeginRequest::default()).is_ok());
}

#[test]
fn test_acquire_at_capacity_times_out() {
    let (_cluster, pool, address) = setup(PoolConfig::new().with_max_size(2));
    let _a = pool.acquire(&address, Duration::ZERO).unwrap();
    let _b = pool.acquire(&address, Duration::ZERO).unwrap();

    let err = pool.acquire(&address, Duration::from_millis(30)).unwrap_err();
    match err {
        DriverError::PoolTimeout { address: a, waited } => {
            assert_eq!(a, address.to_string());
            assert!(waited >= Duration::from_millis(30));
        }
        other => panic!("expected PoolTimeout, got {:?}", other),
    }
}

#[test]
fn test_capacity_is_per_address() {
    let (cluster, pool, leader) = setup(PoolConfig::new().with_max_size(1));
    let follower = cluster.members()[1].clone();
    let _a = pool.acquire(&leader, Duration::ZERO).unwrap();
    assert!(pool.acquire(&follower, Duration::ZERO).is_ok());
}

#[test]
fn test_waiter_wakes_on_release() {
    let (_cluster, pool, address) = setup(PoolConfig::new().with_max_size(1));
    let held = pool.acquire(&address, Duration::ZERO).unwrap();

    let waiter = {
        let pool = pool.clone();
        let address = address.clone();
        thread::spawn(move || pool.acquire(&address, Duration::from_secs(10)).map(|_| ()))
    };
    thread::sleep(Duration::from_millis(20));
    drop(held);

    assert!(waiter.join().unwrap().is_ok());
}

#[test]
fn test_release_wakes_waiter_behind_other_address() {
    let (cluster, pool, leader) = setup(PoolConfig::new().with_max_size(1));
    let follower = cluster.members()[1].clone();
    let held_leader = pool.acquire(&leader, Duration::ZERO).unwrap();
    let held_follower = pool.acquire(&follower, Duration::ZERO).unwrap();

    let spawn_waiter = |address: ServerAddress, timeout: Duration| {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire(&address, timeout).map(|_| Instant::now()))
    };

    // The leader waiter parks first and must not swallow the follower's wakeup
    let leader_waiter = spawn_waiter(leader.clone(), Duration::from_secs(10));
    thread::sleep(Duration::from_millis(20));
    let follower_waiter = spawn_waiter(follower.clone(), Duration::from_secs(5));
    thread::sleep(Duration::from_millis(20));

    let released = Instant::now();
    drop(held_follower);
    let woke = follower_waiter.join().unwrap().unwrap();
    assert!(woke.duration_since(released) < Duration::from_secs(1));

    drop(held_leader);
    assert!(leader_waiter.join().unwrap().is_ok());
}

#[test]
fn test_close_wakes_waiters() {
    let (_cluster, pool, address) = setup(PoolConfig::new().with_max_size(1));
    let held = pool.acquire(&address, Duration::ZERO).unwrap();

    let waiter = {
        let pool = pool.clone();
        let address = address.clone();
        thread::spawn(move || pool.acquire(&address, Duration::from_secs(10)).map(|_| ()))
    };
    thread::sleep(Duration::from_millis(20));
    pool.close();

    assert_eq!(waiter.join().unwrap(), Err(DriverError::PoolClosed));
    drop(held);
    assert_eq!(pool.idle(&address), 0);
    assert_eq!(pool.in_use(&address), 0);
    assert!(pool.is_closed());
}

#[test]
fn test_broken_connection_not_reused() {
    let (cluster, pool, address) = setup(PoolConfig::new());
    cluster.inject(
        FaultPoint::Begin,
        DriverError::ConnectionReset {
            address: address.to_string(),
            reason: "injected".into(),
        },
    );
    {
        let mut conn = pool.acquire(&address, Duration::ZERO).unwrap();
        assert!(conn.begin(&BeginRequest::default()).is_err());
        assert!(conn.is_broken());
    }
    assert_eq!(pool.idle(&address), 0);
    let _fresh = pool.acquire(&address, Duration::ZERO).unwrap();
    assert_eq!(cluster.stats().connections_opened, 2);
}

#[test]
fn test_expired_idle_connection_replaced() {
    let config = PoolConfig::new().with_max_idle_lifetime(Duration::from_millis(10));
    let (cluster, pool, address) = setup(config);
    drop(pool.acquire(&address, Duration::ZERO).unwrap());
    thread::sleep(Duration::from_millis(30));

    let _conn = pool.acquire(&address, Duration::ZERO).unwrap();
    assert_eq!(cluster.stats().connections_opened, 2);
}

#[test]
fn test_warmup_respects_capacity() {
    let (cluster, pool, address) = setup(PoolConfig::new().with_max_size(3));
    assert_eq!(pool.warmup(&address, 5).unwrap(), 3);
    assert_eq!(pool.idle(&address), 3);
    assert_eq!(pool.in_use(&address), 0);
    assert_eq!(cluster.stats().connections_opened, 3);
}

#[test]
fn test_concurrent_borrowers_never_exceed_capacity() {
    const MAX: usize = 3;
    const THREADS: usize = 8;
    let (_cluster, pool, address) = setup(PoolConfig::new().with_max_size(MAX));
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = pool.clone();
            let address = address.clone();
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..20 {
                    let _conn = pool.acquire(&address, Duration::from_secs(10)).unwrap();
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::yield_now();
                    live.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert_eq!(pool.in_use(&address), 0);
    assert!(pool.idle(&address) <= MAX);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any interleaving of acquires and releases keeps the slot accounting
    /// within capacity
    #[test]
    fn prop_accounting_stays_bounded(ops in prop::collection::vec(any::<bool>(), 1..60), max in 1usize..5) {
        let (_cluster, pool, address) = setup(PoolConfig::new().with_max_size(max));
        let mut held = Vec::new();
        for acquire in ops {
            if acquire {
                match pool.acquire(&address, Duration::ZERO) {
                    Ok(conn) => held.push(conn),
                    Err(e) => prop_assert!(matches!(e, DriverError::PoolTimeout { .. }), "expected PoolTimeout, got {:?}", e),
                }
            } else {
                held.pop();
            }
            prop_assert_eq!(pool.in_use(&address), held.len());
            prop_assert!(pool.in_use(&address) + pool.idle(&address) <= max);
        }
    }
}
