//! Bounded, thread-safe connection pool
//!
//! Each server address gets its own idle queue and in-use count. A slot is
//! reserved under the lock and the connection is opened outside it, so a
//! slow connect never blocks other addresses. Waiters park on a `Condvar`
//! and are woken whenever a connection comes back or the pool closes.
//!
//! # Invariants
//!
//! - `in_use + idle <= max_size_per_address` for every address
//! - A connection is lent to at most one borrower at a time
//! - Broken connections are never returned to the idle queue

use crate::config::PoolConfig;
use arbor_core::{DriverError, DriverResult};
use arbor_transport::{AuthToken, Connection, Connector, ServerAddress};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

struct IdleConnection {
    conn: Box<dyn Connection>,
    since: Instant,
}

#[derive(Default)]
struct AddressPool {
    idle: VecDeque<IdleConnection>,
    in_use: usize,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    auth: AuthToken,
    config: PoolConfig,
    slots: Mutex<HashMap<ServerAddress, AddressPool>>,
    returned: Condvar,
    closed: AtomicBool,
}

/// Shared handle to the pool; cloning is cheap
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionPool {
    /// Create an empty pool opening connections through `connector`
    pub fn new(connector: Arc<dyn Connector>, auth: AuthToken, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                auth,
                config,
                slots: Mutex::new(HashMap::new()),
                returned: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Limits this pool was created with
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a connection using the configured acquisition timeout
    pub fn acquire_default(&self, address: &ServerAddress) -> DriverResult<PooledConnection> {
        self.acquire(address, self.inner.config.acquisition_timeout)
    }

    /// Borrow a connection to `address`, blocking up to `timeout` when the
    /// address is at capacity
    ///
    /// # Errors
    /// - `PoolTimeout` if no slot frees up in time
    /// - `PoolClosed` if the pool is (or becomes) closed
    /// - connect errors from the transport, unchanged
    pub fn acquire(&self, address: &ServerAddress, timeout: Duration) -> DriverResult<PooledConnection> {
        let started = Instant::now();
        let deadline = started + timeout;
        let max = self.inner.config.max_size_per_address;

        let mut slots = self.inner.slots.lock();
        loop {
            if self.is_closed() {
                return Err(DriverError::PoolClosed);
            }

            let entry = slots.entry(address.clone()).or_default();
            while let Some(idle) = entry.idle.pop_back() {
                if self.is_expired(&idle) || idle.conn.is_broken() {
                    trace!(target: "arbor::pool", %address, "Discarding stale idle connection");
                    continue;
                }
                entry.in_use += 1;
                trace!(target: "arbor::pool", %address, in_use = entry.in_use, "Lent idle connection");
                return Ok(PooledConnection::new(Arc::clone(&self.inner), address.clone(), idle.conn));
            }

            if entry.in_use < max {
                entry.in_use += 1;
                drop(slots);
                return self.open(address);
            }

            if Instant::now() >= deadline {
                let waited = started.elapsed();
                debug!(target: "arbor::pool", %address, ?waited, "Acquisition timed out");
                return Err(DriverError::PoolTimeout {
                    address: address.to_string(),
                    waited,
                });
            }
            self.inner.returned.wait_until(&mut slots, deadline);
        }
    }

    /// Open a connection for an already reserved slot
    fn open(&self, address: &ServerAddress) -> DriverResult<PooledConnection> {
        match self.inner.connector.connect(address, &self.inner.auth) {
            Ok(conn) => {
                debug!(target: "arbor::pool", %address, "Opened connection");
                Ok(PooledConnection::new(Arc::clone(&self.inner), address.clone(), conn))
            }
            Err(e) => {
                self.inner.free_slot(address, None);
                Err(e)
            }
        }
    }

    fn is_expired(&self, idle: &IdleConnection) -> bool {
        self.inner
            .config
            .max_idle_lifetime
            .map_or(false, |lifetime| idle.since.elapsed() > lifetime)
    }

    /// Pre-open up to `count` idle connections to `address`
    ///
    /// Stops early at capacity. Returns how many were opened.
    pub fn warmup(&self, address: &ServerAddress, count: usize) -> DriverResult<usize> {
        let mut opened = 0;
        for _ in 0..count {
            {
                let mut slots = self.inner.slots.lock();
                if self.is_closed() {
                    return Err(DriverError::PoolClosed);
                }
                let entry = slots.entry(address.clone()).or_default();
                if entry.in_use + entry.idle.len() >= self.inner.config.max_size_per_address {
                    break;
                }
                entry.in_use += 1;
            }
            let pooled = self.open(address)?;
            drop(pooled);
            opened += 1;
        }
        debug!(target: "arbor::pool", %address, opened, "Warmed up");
        Ok(opened)
    }

    /// Connections to `address` currently lent out
    pub fn in_use(&self, address: &ServerAddress) -> usize {
        self.inner.slots.lock().get(address).map_or(0, |p| p.in_use)
    }

    /// Connections to `address` waiting idle
    pub fn idle(&self, address: &ServerAddress) -> usize {
        self.inner.slots.lock().get(address).map_or(0, |p| p.idle.len())
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close every idle connection and refuse further acquisitions
    ///
    /// Blocked `acquire` calls wake up with `PoolClosed`. Connections still
    /// lent out are closed when their borrower drops them. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<IdleConnection> = {
            let mut slots = self.inner.slots.lock();
            let drained = slots.values_mut().flat_map(|p| p.idle.drain(..)).collect();
            self.inner.returned.notify_all();
            drained
        };
        debug!(target: "arbor::pool", closed = drained.len(), "Pool closed");
    }
}

impl PoolInner {
    /// Give back a slot, keeping `conn` idle when provided
    fn free_slot(&self, address: &ServerAddress, conn: Option<Box<dyn Connection>>) {
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(address) {
            entry.in_use = entry.in_use.saturating_sub(1);
            if let Some(conn) = conn {
                if !self.closed.load(Ordering::Acquire) {
                    entry.idle.push_back(IdleConnection {
                        conn,
                        since: Instant::now(),
                    });
                }
            }
        }
        // Waiters of every address share the condvar
        self.returned.notify_all();
    }

    fn release(&self, address: &ServerAddress, mut conn: Box<dyn Connection>, broken: bool) {
        if broken || conn.is_broken() || self.closed.load(Ordering::Acquire) {
            trace!(target: "arbor::pool", %address, "Discarding connection");
            self.free_slot(address, None);
            return;
        }
        match conn.reset() {
            Ok(()) => self.free_slot(address, Some(conn)),
            Err(e) => {
                warn!(target: "arbor::pool", %address, error = %e, "Reset failed, discarding connection");
                self.free_slot(address, None);
            }
        }
    }
}

/// A connection on loan from the pool
///
/// Dereferences to the underlying [`Connection`]. Dropping it returns the
/// connection to the pool.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    address: ServerAddress,
    /// Taken only in `Drop`
    conn: ManuallyDrop<Box<dyn Connection>>,
    broken: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, address: ServerAddress, conn: Box<dyn Connection>) -> Self {
        Self {
            pool,
            address,
            conn: ManuallyDrop::new(conn),
            broken: false,
        }
    }

    /// Address this connection talks to
    pub fn server(&self) -> &ServerAddress {
        &self.address
    }

    /// Discard the connection instead of reusing it on drop
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("address", &self.address)
            .field("broken", &self.broken)
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        &**self.conn
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // SAFETY: `conn` is never touched again after this point.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.release(&self.address, conn, self.broken);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_transport::memory::MemoryCluster;

    fn pool(max: usize) -> (MemoryCluster, ConnectionPool) {
        let cluster = MemoryCluster::builder().build();
        let pool = ConnectionPool::new(
            Arc::new(cluster.connector()),
            AuthToken::none(),
            PoolConfig::new().with_max_size(max),
        );
        (cluster, pool)
    }

    #[test]
    fn test_release_returns_to_idle() {
        let (cluster, pool) = pool(2);
        let address = cluster.leader();
        let conn = pool.acquire(&address, Duration::ZERO).unwrap();
        assert_eq!(pool.in_use(&address), 1);
        drop(conn);
        assert_eq!(pool.in_use(&address), 0);
        assert_eq!(pool.idle(&address), 1);
    }

    #[test]
    fn test_marked_broken_is_discarded() {
        let (cluster, pool) = pool(2);
        let address = cluster.leader();
        let mut conn = pool.acquire(&address, Duration::ZERO).unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.idle(&address), 0);
        assert_eq!(pool.in_use(&address), 0);
    }

    #[test]
    fn test_failed_connect_frees_slot() {
        let (cluster, pool) = pool(1);
        let address = cluster.leader();
        cluster.set_down(&address, true);
        assert!(pool.acquire(&address, Duration::ZERO).is_err());
        assert_eq!(pool.in_use(&address), 0);

        cluster.set_down(&address, false);
        assert!(pool.acquire(&address, Duration::ZERO).is_ok());
    }
}
