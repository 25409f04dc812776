//! Arbor - client-side driver layer for clustered graph databases
//!
//! Arbor sits between an application and a cluster: it pools connections
//! per server, routes reads to followers and writes to the leader, runs
//! managed transactions with retry on transient failures, streams results
//! lazily, and chains sessions causally with bookmarks.
//!
//! # Quick Start
//!
//! ```ignore
//! use arbor::{Driver, Query, SessionConfig};
//!
//! let driver = Driver::builder(connector).build()?;
//! let mut session = driver.session(SessionConfig::new());
//!
//! session.execute_write(|tx| {
//!     tx.run(Query::new("CREATE (:Person {name: $name})").param("name", "Ada"))?;
//!     Ok(())
//! })?;
//!
//! let mut reader = driver.session(
//!     SessionConfig::new().with_bookmarks(session.last_bookmarks()),
//! );
//! ```
//!
//! # Architecture
//!
//! - `arbor-core`: values, records, queries, bookmarks and the error model
//! - `arbor-transport`: the connection boundary and an in-memory cluster
//! - `arbor-pool`: the bounded per-address connection pool
//! - `arbor-engine`: driver, sessions, transactions, retry and routing

pub use arbor_core::{
    AccessMode, Bookmarks, DriverError, DriverResult, ErrorCategory, Query, Record,
    ResultSummary, TransactionConfig, Value,
};
pub use arbor_engine::{
    BookmarkManager, Clock, Driver, DriverBuilder, DriverConfig, EagerResult,
    InMemoryBookmarkManager, InterruptHandle, ManagedTransaction, ManualClock, QueryConfig,
    ResultStream, RetryConfig, RoutingCache, Session, SessionConfig, SystemClock, Transaction,
    TransactionState, CONFIG_FILE_NAME,
};
pub use arbor_pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use arbor_transport::{
    AuthToken, CancelToken, Connection, Connector, RoutingTable, ServerAddress, DEFAULT_PORT,
};

/// The in-memory loopback cluster, for tests and examples
pub mod memory {
    pub use arbor_transport::memory::*;
}
