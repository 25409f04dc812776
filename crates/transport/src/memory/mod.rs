//! In-process loopback cluster
//!
//! A [`MemoryCluster`] simulates a small database cluster: one leader and
//! any number of followers sharing one versioned key/value store. Query
//! semantics come from a handler closure, so tests and demos decide what a
//! query text means without a query language.
//!
//! Beyond plain execution the cluster can:
//! - issue bookmarks (`mem:<version>`) on commit and reject unknown ones
//! - move leadership (`elect`), failing writes sent to the former leader
//! - inject scripted failures at connect/begin/run/pull/commit
//! - delay pulls, honouring the caller's [`CancelToken`](crate::CancelToken)
//! - mark members unreachable
//!
//! ```ignore
//! let cluster = MemoryCluster::builder()
//!     .members(3)
//!     .handler(|query, tx| {
//!         tx.put(query.text(), 1);
//!         Ok(QueryOutput::empty())
//!     })
//!     .build();
//! let connector = cluster.connector();
//! ```

mod connection;
mod store;

pub use connection::MemoryConnection;
pub use store::{QueryOutput, TxView};

use crate::address::{AuthToken, ServerAddress};
use crate::connection::{BeginRequest, Connection, Connector};
use crate::routing::RoutingTable;
use arbor_core::{DriverError, DriverResult, Query, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::Store;
use tracing::debug;

/// Prefix of bookmarks issued by the loopback cluster
pub const BOOKMARK_PREFIX: &str = "mem:";

/// Signature of a query handler
pub type QueryHandler =
    Arc<dyn Fn(&Query, &mut TxView<'_>) -> DriverResult<QueryOutput> + Send + Sync>;

/// Where an injected failure fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Opening a connection
    Connect,
    /// Opening a transaction
    Begin,
    /// Submitting a query
    Run,
    /// Fetching records
    Pull,
    /// Committing
    Commit,
}

/// A BEGIN as received by a member, recorded for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct BeginRecord {
    /// Member that received it
    pub address: ServerAddress,
    /// The full request
    pub request: BeginRequest,
}

/// Counters of work done by the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    /// Connections opened
    pub connections_opened: usize,
    /// Queries executed successfully
    pub queries_run: usize,
    /// Transactions committed
    pub commits: usize,
    /// Transactions rolled back (explicitly or by reset)
    pub rollbacks: usize,
}

pub(crate) struct ClusterShared {
    pub(crate) members: Vec<ServerAddress>,
    pub(crate) leader: Mutex<usize>,
    pub(crate) store: Mutex<Store>,
    pub(crate) handler: QueryHandler,
    pub(crate) faults: Mutex<HashMap<FaultPoint, VecDeque<DriverError>>>,
    pub(crate) pull_latency: Mutex<Duration>,
    pub(crate) down: Mutex<HashSet<ServerAddress>>,
    pub(crate) routing_ttl: Duration,
    pub(crate) begins: Mutex<Vec<BeginRecord>>,
    pub(crate) query_log: Mutex<Vec<String>>,
    pub(crate) connections_opened: AtomicUsize,
    pub(crate) queries_run: AtomicUsize,
    pub(crate) commits: AtomicUsize,
    pub(crate) rollbacks: AtomicUsize,
}

impl ClusterShared {
    /// Pop the next scripted failure for `point`, if any
    pub(crate) fn take_fault(&self, point: FaultPoint) -> Option<DriverError> {
        let mut faults = self.faults.lock();
        let queue = faults.get_mut(&point)?;
        let fault = queue.pop_front();
        if fault.is_some() {
            debug!(target: "arbor::memory", ?point, "Injected fault fired");
        }
        fault
    }

    pub(crate) fn leader_address(&self) -> ServerAddress {
        self.members[*self.leader.lock()].clone()
    }
}

/// Handle to a simulated cluster; cheap to clone
#[derive(Clone)]
pub struct MemoryCluster {
    shared: Arc<ClusterShared>,
}

impl MemoryCluster {
    /// Start configuring a cluster
    pub fn builder() -> MemoryClusterBuilder {
        MemoryClusterBuilder::default()
    }

    /// A [`Connector`] that opens connections into this cluster
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            shared: Arc::clone(&self.shared),
        }
    }

    /// All member addresses; index 0 is the initial leader
    pub fn members(&self) -> &[ServerAddress] {
        &self.shared.members
    }

    /// Current leader
    pub fn leader(&self) -> ServerAddress {
        self.shared.leader_address()
    }

    /// Move leadership to member `index`
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn elect(&self, index: usize) {
        assert!(index < self.shared.members.len(), "no member at index {}", index);
        *self.shared.leader.lock() = index;
        debug!(target: "arbor::memory", leader = %self.shared.members[index], "Leader elected");
    }

    /// Fail the next operation at `point` with `error`
    pub fn inject(&self, point: FaultPoint, error: DriverError) {
        self.inject_times(point, error, 1);
    }

    /// Fail the next `times` operations at `point` with `error`
    pub fn inject_times(&self, point: FaultPoint, error: DriverError, times: usize) {
        let mut faults = self.shared.faults.lock();
        let queue = faults.entry(point).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Delay every pull by `latency`
    pub fn set_pull_latency(&self, latency: Duration) {
        *self.shared.pull_latency.lock() = latency;
    }

    /// Mark a member unreachable (`down = true`) or reachable again
    pub fn set_down(&self, address: &ServerAddress, down: bool) {
        let mut set = self.shared.down.lock();
        if down {
            set.insert(address.clone());
        } else {
            set.remove(address);
        }
    }

    /// Read a committed value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.store.lock().data.get(key).cloned()
    }

    /// Number of committed keys
    pub fn len(&self) -> usize {
        self.shared.store.lock().data.len()
    }

    /// True when nothing has been committed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current store version
    pub fn version(&self) -> u64 {
        self.shared.store.lock().version
    }

    /// Snapshot of the work counters
    pub fn stats(&self) -> ClusterStats {
        ClusterStats {
            connections_opened: self.shared.connections_opened.load(Ordering::Relaxed),
            queries_run: self.shared.queries_run.load(Ordering::Relaxed),
            commits: self.shared.commits.load(Ordering::Relaxed),
            rollbacks: self.shared.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Every BEGIN received so far, in order
    pub fn begins(&self) -> Vec<BeginRecord> {
        self.shared.begins.lock().clone()
    }

    /// Text of every successfully executed query, in order
    pub fn query_log(&self) -> Vec<String> {
        self.shared.query_log.lock().clone()
    }
}

/// Builder for [`MemoryCluster`]
pub struct MemoryClusterBuilder {
    members: Vec<ServerAddress>,
    handler: QueryHandler,
    routing_ttl: Duration,
}

impl Default for MemoryClusterBuilder {
    fn default() -> Self {
        Self {
            members: vec![ServerAddress::new("memory-0", 7687)],
            handler: Arc::new(|_, _| Ok(QueryOutput::empty())),
            routing_ttl: Duration::from_secs(300),
        }
    }
}

impl MemoryClusterBuilder {
    /// Use `count` members named `memory-0` .. `memory-{count-1}`
    pub fn members(mut self, count: usize) -> Self {
        let count = count.max(1);
        self.members = (0..count)
            .map(|i| ServerAddress::new(format!("memory-{}", i), 7687))
            .collect();
        self
    }

    /// Use explicit member addresses
    pub fn addresses(mut self, addresses: Vec<ServerAddress>) -> Self {
        if !addresses.is_empty() {
            self.members = addresses;
        }
        self
    }

    /// Set the query handler
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Query, &mut TxView<'_>) -> DriverResult<QueryOutput> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }

    /// TTL reported in routing tables
    pub fn routing_ttl(mut self, ttl: Duration) -> Self {
        self.routing_ttl = ttl;
        self
    }

    /// Build the cluster
    pub fn build(self) -> MemoryCluster {
        MemoryCluster {
            shared: Arc::new(ClusterShared {
                members: self.members,
                leader: Mutex::new(0),
                store: Mutex::new(Store::default()),
                handler: self.handler,
                faults: Mutex::new(HashMap::new()),
                pull_latency: Mutex::new(Duration::ZERO),
                down: Mutex::new(HashSet::new()),
                routing_ttl: self.routing_ttl,
                begins: Mutex::new(Vec::new()),
                query_log: Mutex::new(Vec::new()),
                connections_opened: AtomicUsize::new(0),
                queries_run: AtomicUsize::new(0),
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            }),
        }
    }
}

/// [`Connector`] into a [`MemoryCluster`]
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<ClusterShared>,
}

impl Connector for MemoryConnector {
    fn connect(&self, address: &ServerAddress, _auth: &AuthToken) -> DriverResult<Box<dyn Connection>> {
        if !self.shared.members.contains(address) || self.shared.down.lock().contains(address) {
            return Err(DriverError::ConnectionFailed {
                address: address.to_string(),
                reason: "member unreachable".to_string(),
            });
        }
        if let Some(fault) = self.shared.take_fault(FaultPoint::Connect) {
            return Err(fault);
        }
        self.shared.connections_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryConnection::new(
            Arc::clone(&self.shared),
            address.clone(),
        )))
    }

    fn fetch_routing_table(&self, database: Option<&str>, _auth: &AuthToken) -> DriverResult<RoutingTable> {
        let down = self.shared.down.lock();
        let reachable: Vec<ServerAddress> = self
            .shared
            .members
            .iter()
            .filter(|a| !down.contains(*a))
            .cloned()
            .collect();
        if reachable.is_empty() {
            return Err(DriverError::ConnectionFailed {
                address: "routing".to_string(),
                reason: "no reachable router".to_string(),
            });
        }
        let leader = self.shared.leader_address();
        let writers: Vec<ServerAddress> = reachable.iter().filter(|a| **a == leader).cloned().collect();
        let followers: Vec<ServerAddress> = reachable.iter().filter(|a| **a != leader).cloned().collect();
        // A lone member serves reads as well
        let readers = if followers.is_empty() {
            reachable.clone()
        } else {
            followers
        };
        Ok(RoutingTable {
            database: database.map(str::to_string),
            routers: reachable,
            readers,
            writers,
            ttl: self.shared.routing_ttl,
        })
    }
}

/// Parse a `mem:<version>` bookmark
pub(crate) fn parse_bookmark(token: &str) -> Option<u64> {
    token.strip_prefix(BOOKMARK_PREFIX)?.parse().ok()
}
