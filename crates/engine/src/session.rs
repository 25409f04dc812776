//! Sessions
//!
//! A [`Session`] is a sequential context for transactions against one
//! database. It runs at most one transaction at a time, borrows a
//! connection from the pool for each, and accumulates the bookmarks of
//! everything it commits so later transactions observe earlier ones.
//!
//! Sessions take `&mut self` everywhere and are not meant to be shared
//! between threads; open one per thread or per unit of work instead.

use crate::bookmark_manager::BookmarkManager;
use crate::driver::DriverInner;
use crate::executor::RetryExecutor;
use crate::transaction::{ManagedTransaction, Transaction, TransactionState, TxShared};
use arbor_core::{AccessMode, Bookmarks, DriverError, DriverResult, TransactionConfig};
use arbor_transport::{BeginRequest, CancelToken};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Options for opening a [`Session`]
///
/// # Example
/// ```ignore
/// let config = SessionConfig::new()
///     .with_database("movies")
///     .with_access_mode(AccessMode::Read)
///     .with_bookmarks(writer_bookmarks);
/// ```
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Target database; `None` uses the driver default
    pub database: Option<String>,
    /// Access mode of explicit transactions
    pub default_access_mode: AccessMode,
    /// Bookmarks the first transaction must wait for
    pub bookmarks: Bookmarks,
    /// Run every transaction as this user
    pub impersonated_user: Option<String>,
    /// Records per pull; `None` uses the driver default
    pub fetch_size: Option<usize>,
    /// Shared bookmark source and sink
    pub bookmark_manager: Option<Arc<dyn BookmarkManager>>,
}

impl SessionConfig {
    /// Create with defaults (server default database, write mode)
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a named database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Access mode for explicit transactions
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }

    /// Seed the session with bookmarks from other sessions
    pub fn with_bookmarks(mut self, bookmarks: Bookmarks) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// Impersonate another user
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.impersonated_user = Some(user.into());
        self
    }

    /// Records per pull
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = Some(fetch_size.max(1));
        self
    }

    /// Share bookmarks through `manager`
    pub fn with_bookmark_manager(mut self, manager: Arc<dyn BookmarkManager>) -> Self {
        self.bookmark_manager = Some(manager);
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("database", &self.database)
            .field("default_access_mode", &self.default_access_mode)
            .field("bookmarks", &self.bookmarks)
            .field("impersonated_user", &self.impersonated_user)
            .field("fetch_size", &self.fetch_size)
            .field("bookmark_manager", &self.bookmark_manager.is_some())
            .finish()
    }
}

/// Session state reachable from its transactions
pub(crate) struct SessionLedger {
    bookmarks: Bookmarks,
    manager: Option<Arc<dyn BookmarkManager>>,
    active: Option<Weak<Mutex<TxShared>>>,
}

impl SessionLedger {
    /// Bookmarks to send with the next BEGIN
    fn begin_bookmarks(&self) -> Bookmarks {
        match &self.manager {
            Some(manager) => self.bookmarks.merge(&manager.bookmarks()),
            None => self.bookmarks.clone(),
        }
    }

    /// Merge the bookmark of a successful commit
    pub(crate) fn record_commit(&mut self, bookmark: &str) {
        let committed = Bookmarks::from_tokens([bookmark]);
        self.bookmarks = self.bookmarks.merge(&committed);
        if let Some(manager) = &self.manager {
            manager.update(&committed);
        }
    }
}

/// Lets another thread abort a blocked fetch in a session
///
/// The interrupted fetch fails with `Interrupted` and its transaction
/// becomes FAILED. Interrupting when nothing is running has no effect on
/// later transactions.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    current: Arc<Mutex<Option<CancelToken>>>,
}

impl InterruptHandle {
    /// Cancel the session's current transaction
    pub fn interrupt(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            debug!(target: "arbor::session", "Interrupt requested");
            token.cancel();
        }
    }
}

/// A sequential transaction context
pub struct Session {
    driver: Arc<DriverInner>,
    database: Option<String>,
    default_access_mode: AccessMode,
    impersonated_user: Option<String>,
    fetch_size: usize,
    ledger: Arc<Mutex<SessionLedger>>,
    interrupt: Arc<Mutex<Option<CancelToken>>>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(driver: Arc<DriverInner>, config: SessionConfig) -> Self {
        let database = config.database.or_else(|| driver.config.database.clone());
        let fetch_size = config.fetch_size.unwrap_or(driver.config.fetch_size);
        debug!(
            target: "arbor::session",
            database = database.as_deref().unwrap_or("<default>"),
            mode = %config.default_access_mode,
            "Session opened"
        );
        Self {
            driver,
            database,
            default_access_mode: config.default_access_mode,
            impersonated_user: config.impersonated_user,
            fetch_size,
            ledger: Arc::new(Mutex::new(SessionLedger {
                bookmarks: config.bookmarks,
                manager: config.bookmark_manager,
                active: None,
            })),
            interrupt: Arc::new(Mutex::new(None)),
            closed: false,
        }
    }

    /// Database this session targets; `None` is the server default
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Access mode of explicit transactions
    pub fn default_access_mode(&self) -> AccessMode {
        self.default_access_mode
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bookmarks accumulated so far
    pub fn last_bookmarks(&self) -> Bookmarks {
        self.ledger.lock().bookmarks.clone()
    }

    /// Handle for interrupting this session from another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            current: Arc::clone(&self.interrupt),
        }
    }

    /// Begin an explicit transaction in the session's default access mode
    ///
    /// # Errors
    /// - `SessionBusy` while another transaction of this session is open
    /// - `SessionClosed` after [`close`](Self::close)
    /// - routing, pool and BEGIN failures
    pub fn begin_transaction(&mut self) -> DriverResult<Transaction> {
        self.begin_transaction_with(TransactionConfig::default())
    }

    /// Begin an explicit transaction with a timeout and metadata
    pub fn begin_transaction_with(&mut self, config: TransactionConfig) -> DriverResult<Transaction> {
        let mode = self.default_access_mode;
        self.open_transaction(mode, &config)
    }

    /// Run `work` in a managed read transaction, retrying transient failures
    ///
    /// `work` may run several times and must be idempotent.
    pub fn execute_read<T, F>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(&mut ManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Read, TransactionConfig::default(), work)
    }

    /// Run `work` in a managed write transaction, retrying transient failures
    ///
    /// `work` may run several times and must be idempotent.
    pub fn execute_write<T, F>(&mut self, work: F) -> DriverResult<T>
    where
        F: FnMut(&mut ManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Write, TransactionConfig::default(), work)
    }

    /// [`execute_read`](Self::execute_read) with a transaction config
    pub fn execute_read_with<T, F>(&mut self, config: TransactionConfig, work: F) -> DriverResult<T>
    where
        F: FnMut(&mut ManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Read, config, work)
    }

    /// [`execute_write`](Self::execute_write) with a transaction config
    pub fn execute_write_with<T, F>(&mut self, config: TransactionConfig, work: F) -> DriverResult<T>
    where
        F: FnMut(&mut ManagedTransaction) -> DriverResult<T>,
    {
        self.execute(AccessMode::Write, config, work)
    }

    /// The managed-transaction loop: one fresh transaction per attempt
    pub(crate) fn execute<T, F>(&mut self, mode: AccessMode, config: TransactionConfig, mut work: F) -> DriverResult<T>
    where
        F: FnMut(&mut ManagedTransaction) -> DriverResult<T>,
    {
        self.ensure_open()?;
        let driver = Arc::clone(&self.driver);
        let executor = RetryExecutor::new(&driver.retry, driver.clock.as_ref());

        executor.run(|attempt| {
            trace!(target: "arbor::session", attempt, %mode, "Starting managed transaction");
            let tx = self.open_transaction(mode, &config)?;
            let mut managed = ManagedTransaction::new(tx);
            let outcome = work(&mut managed);
            let result = managed.finish(outcome);
            if let Err(e) = &result {
                self.note_failure(e);
            }
            result
        })
    }

    /// Roll back any open transaction and release its connection
    ///
    /// Idempotent. Dropping the session closes it.
    pub fn close(&mut self) -> DriverResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let active = self.ledger.lock().active.take().and_then(|w| w.upgrade());
        let result = match active {
            Some(shared) => {
                let mut tx = shared.lock();
                if tx.state() == TransactionState::Open {
                    debug!(target: "arbor::session", "Rolling back open transaction on close");
                    tx.rollback()
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        };
        debug!(target: "arbor::session", "Session closed");
        result
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed {
            return Err(DriverError::SessionClosed);
        }
        Ok(())
    }

    fn ensure_idle(&self) -> DriverResult<()> {
        let active = self.ledger.lock().active.as_ref().and_then(Weak::upgrade);
        if let Some(shared) = active {
            if shared.lock().state() == TransactionState::Open {
                return Err(DriverError::SessionBusy);
            }
        }
        Ok(())
    }

    /// Keep routing in step with what a failure revealed
    fn note_failure(&self, err: &DriverError) {
        if let DriverError::LeaderSwitch { address } = err {
            debug!(target: "arbor::session", %address, "Leader moved");
            self.driver.routing.invalidate(self.database.as_deref());
        }
    }

    fn open_transaction(&mut self, mode: AccessMode, config: &TransactionConfig) -> DriverResult<Transaction> {
        self.ensure_open()?;
        self.ensure_idle()?;

        let database = self.database.as_deref();
        let address = self.driver.routing.select(database, mode)?;
        let mut conn = match self.driver.pool.acquire_default(&address) {
            Ok(conn) => conn,
            Err(e) => {
                if matches!(e, DriverError::ConnectionFailed { .. }) {
                    self.driver.routing.forget(database, &address);
                }
                return Err(e);
            }
        };

        let bookmarks = self.ledger.lock().begin_bookmarks();
        let request = BeginRequest {
            database: self.database.clone(),
            access_mode: mode,
            bookmarks,
            impersonated_user: self.impersonated_user.clone(),
            config: config.clone(),
        };
        if let Err(e) = conn.begin(&request) {
            if e.is_connection_fatal() {
                conn.mark_broken();
            }
            self.note_failure(&e);
            return Err(e);
        }

        let cancel = CancelToken::new();
        *self.interrupt.lock() = Some(cancel.clone());
        let shared = Arc::new(Mutex::new(TxShared::new(
            conn,
            cancel,
            self.fetch_size,
            Arc::clone(&self.ledger),
        )));
        self.ledger.lock().active = Some(Arc::downgrade(&shared));
        debug!(target: "arbor::session", %address, %mode, "Transaction started");
        Ok(Transaction::new(shared))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", &self.database)
            .field("default_access_mode", &self.default_access_mode)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "arbor::session", error = %e, "Error closing session");
        }
    }
}
