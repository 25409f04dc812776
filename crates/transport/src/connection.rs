//! The transport boundary
//!
//! The driver talks to the database only through these two traits. Wire
//! encoding, sockets and authentication live behind them. Implementations
//! classify their failures into [`DriverError`](arbor_core::DriverError)
//! variants; the driver never reinterprets them.

use crate::address::{AuthToken, ServerAddress};
use crate::cancel::CancelToken;
use crate::routing::RoutingTable;
use arbor_core::{AccessMode, Bookmarks, DriverResult, Query, ResultSummary, TransactionConfig, Value};

/// Identifier of a query result within a connection
pub type QueryId = u64;

/// Everything the server needs to open a transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BeginRequest {
    /// Target database, `None` for the server default
    pub database: Option<String>,
    /// Routing hint the transaction was opened with
    pub access_mode: AccessMode,
    /// The server must have applied these before the transaction starts
    pub bookmarks: Bookmarks,
    /// Run as this user instead of the authenticated one
    pub impersonated_user: Option<String>,
    /// Timeout and metadata
    pub config: TransactionConfig,
}

/// Reply to a query submission
#[derive(Debug, Clone, PartialEq)]
pub struct RunResponse {
    /// Handle for pulling the records
    pub qid: QueryId,
    /// Column names
    pub keys: Vec<String>,
}

/// One batch of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResponse {
    /// Rows in column order
    pub records: Vec<Vec<Value>>,
    /// Whether more records remain on the server
    pub has_more: bool,
    /// Present on the final batch
    pub summary: Option<ResultSummary>,
}

/// A single stateful connection to one member
///
/// A connection serves one transaction at a time and is never shared
/// between threads concurrently (`Send`, not `Sync`).
pub trait Connection: Send {
    /// Member this connection talks to
    fn address(&self) -> &ServerAddress;

    /// Open a transaction
    fn begin(&mut self, request: &BeginRequest) -> DriverResult<()>;

    /// Submit a query inside the open transaction
    fn run(&mut self, query: &Query, cancel: &CancelToken) -> DriverResult<RunResponse>;

    /// Fetch up to `n` records of a submitted query
    fn pull(&mut self, qid: QueryId, n: usize, cancel: &CancelToken) -> DriverResult<PullResponse>;

    /// Drop the remaining records of a query and return its summary
    fn discard(&mut self, qid: QueryId, cancel: &CancelToken) -> DriverResult<ResultSummary>;

    /// Commit; returns the bookmark of the new database state, if any
    fn commit(&mut self) -> DriverResult<Option<String>>;

    /// Roll back the open transaction
    fn rollback(&mut self) -> DriverResult<()>;

    /// Return the connection to a clean state before reuse
    fn reset(&mut self) -> DriverResult<()>;

    /// Whether the connection can no longer be used
    fn is_broken(&self) -> bool;
}

/// Factory for connections and routing information
pub trait Connector: Send + Sync {
    /// Open a connection to `address`
    fn connect(&self, address: &ServerAddress, auth: &AuthToken) -> DriverResult<Box<dyn Connection>>;

    /// Ask the cluster which members serve reads and writes for `database`
    fn fetch_routing_table(&self, database: Option<&str>, auth: &AuthToken) -> DriverResult<RoutingTable>;
}
