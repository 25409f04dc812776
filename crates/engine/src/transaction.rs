//! Transactions
//!
//! A transaction owns one pooled connection from BEGIN until it ends. Its
//! mutable state lives in [`TxShared`], shared between the [`Transaction`]
//! handle and every [`ResultStream`] it issued, so streams can pull more
//! records and the transaction can buffer or discard them.
//!
//! # State machine
//!
//! ```text
//! OPEN --commit--> COMMITTED
//! OPEN --rollback--> ROLLED_BACK
//! OPEN --query/connection failure--> FAILED (implicit rollback)
//! ```
//!
//! Only OPEN accepts queries. Ending the transaction, in any way, returns
//! the connection to the pool and drops every stream buffer.

use crate::result::ResultStream;
use crate::session::SessionLedger;
use arbor_core::{DriverError, DriverResult, Query, Record, ResultSummary};
use arbor_pool::PooledConnection;
use arbor_transport::{CancelToken, QueryId};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle state of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting queries
    Open,
    /// Committed successfully
    Committed,
    /// Rolled back by the caller, the session or the driver
    RolledBack,
    /// Ended by a failed query or connection; the server rolled it back
    Failed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
            TransactionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-stream buffer of records received but not yet handed out
struct StreamState {
    keys: Arc<[String]>,
    buffer: VecDeque<Record>,
    has_more: bool,
    summary: Option<ResultSummary>,
}

/// Records handed to a stream; `summary` is set once the stream is complete
pub(crate) struct Batch {
    pub(crate) records: Vec<Record>,
    pub(crate) summary: Option<ResultSummary>,
}

/// State shared by a transaction and its result streams
pub(crate) struct TxShared {
    conn: Option<PooledConnection>,
    state: TransactionState,
    cancel: CancelToken,
    fetch_size: usize,
    streams: BTreeMap<QueryId, StreamState>,
    ledger: Arc<Mutex<SessionLedger>>,
    bookmark: Option<String>,
}

impl TxShared {
    pub(crate) fn new(
        conn: PooledConnection,
        cancel: CancelToken,
        fetch_size: usize,
        ledger: Arc<Mutex<SessionLedger>>,
    ) -> Self {
        Self {
            conn: Some(conn),
            state: TransactionState::Open,
            cancel,
            fetch_size,
            streams: BTreeMap::new(),
            ledger,
            bookmark: None,
        }
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.state != TransactionState::Open {
            return Err(DriverError::InvalidTransactionState {
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn connection(&mut self) -> DriverResult<&mut PooledConnection> {
        let state = self.state;
        self.conn.as_mut().ok_or_else(|| DriverError::InvalidTransactionState {
            state: state.to_string(),
        })
    }

    /// End the transaction after an error; the server has rolled it back
    /// or will once the connection is gone
    fn fail(&mut self, err: &DriverError) {
        self.state = TransactionState::Failed;
        self.streams.clear();
        if let Some(mut conn) = self.conn.take() {
            if err.is_connection_fatal() || conn.is_broken() {
                conn.mark_broken();
            } else if let Err(e) = conn.rollback() {
                warn!(target: "arbor::txn", error = %e, "Rollback after failure did not complete");
                conn.mark_broken();
            }
        }
        debug!(target: "arbor::txn", error = %err, "Transaction failed");
    }

    /// Submit a query; earlier streams are buffered first
    pub(crate) fn run(&mut self, query: &Query) -> DriverResult<(QueryId, Arc<[String]>)> {
        self.ensure_open()?;
        self.buffer_pending()?;

        let cancel = self.cancel.clone();
        let submitted = {
            let conn = self.connection()?;
            conn.run(query, &cancel)
        };
        let response = match submitted {
            Ok(response) => response,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let keys: Arc<[String]> = Arc::from(response.keys);
        self.streams.insert(
            response.qid,
            StreamState {
                keys: Arc::clone(&keys),
                buffer: VecDeque::new(),
                has_more: true,
                summary: None,
            },
        );
        trace!(target: "arbor::txn", qid = response.qid, query = query.text(), "Query submitted");
        Ok((response.qid, keys))
    }

    /// Pull one batch of `fetch_size` records for `qid` into its buffer
    fn pull_batch(&mut self, qid: QueryId) -> DriverResult<()> {
        let cancel = self.cancel.clone();
        let fetch_size = self.fetch_size;
        let pulled = {
            let conn = self.connection()?;
            conn.pull(qid, fetch_size, &cancel)
        };
        let response = match pulled {
            Ok(response) => response,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let stream = self.streams.get_mut(&qid).ok_or(DriverError::ResultConsumed)?;
        let keys = Arc::clone(&stream.keys);
        stream
            .buffer
            .extend(response.records.into_iter().map(|values| Record::new(Arc::clone(&keys), values)));
        stream.has_more = response.has_more;
        if response.summary.is_some() {
            stream.summary = response.summary;
        }
        trace!(target: "arbor::result", qid, buffered = stream.buffer.len(), has_more = stream.has_more, "Pulled batch");
        Ok(())
    }

    fn ensure_buffered(&mut self, qid: QueryId, n: usize) -> DriverResult<()> {
        loop {
            let stream = self.streams.get(&qid).ok_or(DriverError::ResultConsumed)?;
            if stream.buffer.len() >= n || !stream.has_more {
                return Ok(());
            }
            self.pull_batch(qid)?;
        }
    }

    /// Pull everything still on the server for every open stream
    fn buffer_pending(&mut self) -> DriverResult<()> {
        let pending: Vec<QueryId> = self
            .streams
            .iter()
            .filter(|(_, s)| s.has_more)
            .map(|(qid, _)| *qid)
            .collect();
        for qid in pending {
            while self.streams.get(&qid).map_or(false, |s| s.has_more) {
                self.pull_batch(qid)?;
            }
        }
        Ok(())
    }

    /// Hand out up to `n` records of `qid`
    pub(crate) fn take(&mut self, qid: QueryId, n: usize) -> DriverResult<Batch> {
        self.ensure_buffered(qid, n)?;
        let stream = self.streams.get_mut(&qid).ok_or(DriverError::ResultConsumed)?;
        let count = n.min(stream.buffer.len());
        let records: Vec<Record> = stream.buffer.drain(..count).collect();

        let summary = if stream.buffer.is_empty() && !stream.has_more {
            self.streams.remove(&qid).and_then(|s| s.summary)
        } else {
            None
        };
        Ok(Batch { records, summary })
    }

    /// Next record of `qid` without consuming it
    pub(crate) fn peek(&mut self, qid: QueryId) -> DriverResult<Option<Record>> {
        self.ensure_buffered(qid, 1)?;
        let stream = self.streams.get(&qid).ok_or(DriverError::ResultConsumed)?;
        Ok(stream.buffer.front().cloned())
    }

    /// Drop the rest of `qid` and return its summary
    pub(crate) fn consume(&mut self, qid: QueryId) -> DriverResult<ResultSummary> {
        let stream = self.streams.remove(&qid).ok_or(DriverError::ResultConsumed)?;
        if !stream.has_more {
            return stream.summary.ok_or(DriverError::ResultConsumed);
        }
        let cancel = self.cancel.clone();
        let discarded = {
            let conn = self.connection()?;
            conn.discard(qid, &cancel)
        };
        discarded.map_err(|e| {
            self.fail(&e);
            e
        })
    }

    pub(crate) fn commit(&mut self) -> DriverResult<Option<String>> {
        self.ensure_open()?;

        // Results nobody read are dropped server side before COMMIT
        let pending: Vec<QueryId> = self
            .streams
            .iter()
            .filter(|(_, s)| s.has_more)
            .map(|(qid, _)| *qid)
            .collect();
        let cancel = self.cancel.clone();
        for qid in pending {
            let discarded = {
                let conn = self.connection()?;
                conn.discard(qid, &cancel)
            };
            if let Err(e) = discarded {
                self.fail(&e);
                return Err(e);
            }
        }

        let committed = {
            let conn = self.connection()?;
            conn.commit()
        };
        match committed {
            Ok(bookmark) => {
                self.state = TransactionState::Committed;
                self.streams.clear();
                self.conn = None;
                if let Some(token) = &bookmark {
                    self.ledger.lock().record_commit(token);
                }
                info!(
                    target: "arbor::txn",
                    bookmark = bookmark.as_deref().unwrap_or("<none>"),
                    "Transaction committed"
                );
                self.bookmark = bookmark.clone();
                Ok(bookmark)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub(crate) fn rollback(&mut self) -> DriverResult<()> {
        match self.state {
            TransactionState::Open => {}
            TransactionState::RolledBack | TransactionState::Failed => return Ok(()),
            TransactionState::Committed => {
                return Err(DriverError::InvalidTransactionState {
                    state: self.state.to_string(),
                })
            }
        }

        self.state = TransactionState::RolledBack;
        self.streams.clear();
        let result = match self.conn.take() {
            Some(mut conn) => {
                let result = conn.rollback();
                if result.is_err() {
                    conn.mark_broken();
                }
                result
            }
            None => Ok(()),
        };
        debug!(target: "arbor::txn", "Transaction rolled back");
        result
    }
}

// ============================================================================
// Explicit transactions
// ============================================================================

/// A transaction committed or rolled back by the caller
///
/// Dropping a transaction that is still open rolls it back.
///
/// # Example
/// ```ignore
/// let mut tx = session.begin_transaction()?;
/// tx.run(Query::new("CREATE (:Person {name: $name})").param("name", "Ada"))?;
/// let bookmark = tx.commit()?;
/// ```
pub struct Transaction {
    shared: Arc<Mutex<TxShared>>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Mutex<TxShared>>) -> Self {
        Self { shared }
    }

    /// Run a query and return a stream over its records
    ///
    /// Records of earlier streams not yet read are buffered first.
    ///
    /// # Errors
    /// - `InvalidTransactionState` unless the transaction is open
    /// - any transport error; the transaction then becomes FAILED
    pub fn run(&mut self, query: impl Into<Query>) -> DriverResult<ResultStream> {
        let query = query.into();
        let (qid, keys) = self.shared.lock().run(&query)?;
        Ok(ResultStream::new(Arc::clone(&self.shared), qid, keys))
    }

    /// Commit, returning the bookmark of the new database state
    ///
    /// The bookmark is also merged into the owning session's bookmarks.
    pub fn commit(&mut self) -> DriverResult<Option<String>> {
        self.shared.lock().commit()
    }

    /// Roll back; a no-op if already rolled back or failed
    pub fn rollback(&mut self) -> DriverResult<()> {
        self.shared.lock().rollback()
    }

    /// Roll back if still open, otherwise do nothing
    pub fn close(&mut self) -> DriverResult<()> {
        if self.is_open() {
            self.rollback()
        } else {
            Ok(())
        }
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.shared.lock().state()
    }

    /// Whether queries can still run
    pub fn is_open(&self) -> bool {
        self.state() == TransactionState::Open
    }

    /// Bookmark returned by a successful commit
    pub fn bookmark(&self) -> Option<String> {
        self.shared.lock().bookmark.clone()
    }

    /// Result streams of this transaction still held somewhere
    pub(crate) fn live_streams(&self) -> usize {
        Arc::strong_count(&self.shared) - 1
    }

    fn rollback_quietly(&mut self) {
        if self.is_open() {
            if let Err(e) = self.rollback() {
                warn!(target: "arbor::txn", error = %e, "Rollback failed");
            }
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("state", &self.state()).finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.rollback_quietly();
    }
}

// ============================================================================
// Managed transactions
// ============================================================================

/// The transaction handed to a managed work function
///
/// Only queries can be run; the driver decides on commit, rollback and
/// retry. Result streams must be fully used inside the work function.
pub struct ManagedTransaction {
    tx: Transaction,
}

impl ManagedTransaction {
    pub(crate) fn new(tx: Transaction) -> Self {
        Self { tx }
    }

    /// Run a query and return a stream over its records
    pub fn run(&mut self, query: impl Into<Query>) -> DriverResult<ResultStream> {
        self.tx.run(query)
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        self.tx.state()
    }

    /// Commit after a successful work function, roll back otherwise
    pub(crate) fn finish<T>(mut self, outcome: DriverResult<T>) -> DriverResult<T> {
        match outcome {
            Ok(value) => {
                let live = self.tx.live_streams();
                if live > 0 {
                    warn!(target: "arbor::txn", live, "Result stream outlived its work function, rolling back");
                    self.tx.rollback_quietly();
                    return Err(DriverError::ResultEscaped);
                }
                self.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.tx.rollback_quietly();
                Err(e)
            }
        }
    }
}

impl fmt::Debug for ManagedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTransaction")
            .field("state", &self.state())
            .finish()
    }
}
