//! The driver: entry point owning the pool, routing and retry policy
//!
//! A [`Driver`] is a cheap-to-clone handle; every clone shares one
//! connection pool and one routing cache. Create it once at startup,
//! open sessions from it, and [`close`](Driver::close) it on shutdown.

use crate::bookmark_manager::{BookmarkManager, InMemoryBookmarkManager};
use crate::config::DriverConfig;
use crate::retry::{Clock, RetryConfig, SystemClock};
use crate::routing::RoutingCache;
use crate::session::{Session, SessionConfig};
use arbor_core::{AccessMode, DriverResult, Query, Record, ResultSummary, TransactionConfig};
use arbor_pool::ConnectionPool;
use arbor_transport::{AuthToken, Connector, RoutingTable, ServerAddress};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub(crate) struct DriverInner {
    pub(crate) config: DriverConfig,
    pub(crate) pool: ConnectionPool,
    pub(crate) routing: RoutingCache,
    pub(crate) retry: RetryConfig,
    pub(crate) clock: Arc<dyn Clock>,
    query_bookmarks: Arc<dyn BookmarkManager>,
}

/// Builder for [`Driver`]
///
/// # Example
/// ```ignore
/// let driver = Driver::builder(connector)
///     .auth(AuthToken::basic("neo4j", "secret"))
///     .config(DriverConfig::from_file(Path::new("arbor.toml"))?)
///     .build()?;
/// ```
pub struct DriverBuilder {
    connector: Arc<dyn Connector>,
    auth: AuthToken,
    config: DriverConfig,
    retry: Option<RetryConfig>,
    clock: Option<Arc<dyn Clock>>,
}

impl DriverBuilder {
    /// Credentials for every connection
    pub fn auth(mut self, auth: AuthToken) -> Self {
        self.auth = auth;
        self
    }

    /// Driver settings, usually loaded from `arbor.toml`
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Retry policy overriding the `[retry]` section of the config
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Time source for backoff and routing expiry
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and create the driver
    ///
    /// No connection is opened; see [`Driver::verify_connectivity`].
    pub fn build(self) -> DriverResult<Driver> {
        self.config.validate()?;
        let retry = self.retry.unwrap_or_else(|| self.config.retry_config());
        retry.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let pool = ConnectionPool::new(Arc::clone(&self.connector), self.auth.clone(), self.config.pool_config());
        let routing = RoutingCache::new(
            self.connector,
            self.auth,
            Arc::clone(&clock),
            self.config.max_routing_ttl(),
        );
        info!(
            target: "arbor::pool",
            max_size_per_address = self.config.pool.max_size_per_address,
            fetch_size = self.config.fetch_size,
            "Driver created"
        );
        Ok(Driver {
            inner: Arc::new(DriverInner {
                config: self.config,
                pool,
                routing,
                retry,
                clock,
                query_bookmarks: Arc::new(InMemoryBookmarkManager::default()),
            }),
        })
    }
}

/// Options for [`Driver::execute_query`]
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Target database; `None` uses the driver default
    pub database: Option<String>,
    /// Route to a reader or the writer
    pub access_mode: AccessMode,
    /// Run as this user
    pub impersonated_user: Option<String>,
    /// Timeout and metadata of the transaction
    pub transaction: TransactionConfig,
    /// Chain with other `execute_query` calls through the driver's
    /// bookmark manager (default: true)
    pub use_bookmark_manager: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            database: None,
            access_mode: AccessMode::Write,
            impersonated_user: None,
            transaction: TransactionConfig::default(),
            use_bookmark_manager: true,
        }
    }
}

impl QueryConfig {
    /// Create with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a named database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Route as a read
    pub fn read(mut self) -> Self {
        self.access_mode = AccessMode::Read;
        self
    }

    /// Impersonate another user
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.impersonated_user = Some(user.into());
        self
    }

    /// Transaction timeout and metadata
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// Do not read or feed the driver's bookmark manager
    pub fn without_bookmark_manager(mut self) -> Self {
        self.use_bookmark_manager = false;
        self
    }
}

/// Fully materialized result of [`Driver::execute_query`]
#[derive(Debug, Clone, PartialEq)]
pub struct EagerResult {
    /// Column names
    pub keys: Vec<String>,
    /// Every record
    pub records: Vec<Record>,
    /// Summary of the query
    pub summary: ResultSummary,
}

/// Entry point of the driver
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    /// Start building a driver that connects through `connector`
    pub fn builder(connector: impl Connector + 'static) -> DriverBuilder {
        DriverBuilder {
            connector: Arc::new(connector),
            auth: AuthToken::none(),
            config: DriverConfig::default(),
            retry: None,
            clock: None,
        }
    }

    /// Open a session
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(Arc::clone(&self.inner), config)
    }

    /// Run one query in a managed transaction and collect every record
    ///
    /// Retries like [`Session::execute_write`]. By default the call waits
    /// for, and contributes to, the bookmarks of earlier `execute_query`
    /// calls on this driver.
    pub fn execute_query(&self, query: impl Into<Query>, config: &QueryConfig) -> DriverResult<EagerResult> {
        let query = query.into();
        let mut session_config = SessionConfig::new().with_access_mode(config.access_mode);
        session_config.database = config.database.clone();
        session_config.impersonated_user = config.impersonated_user.clone();
        if config.use_bookmark_manager {
            session_config = session_config.with_bookmark_manager(Arc::clone(&self.inner.query_bookmarks));
        }

        let mut session = self.session(session_config);
        let result = session.execute(config.access_mode, config.transaction.clone(), |tx| {
            let mut stream = tx.run(query.clone())?;
            let keys = stream.keys().to_vec();
            let records = stream.by_ref().collect::<DriverResult<Vec<Record>>>()?;
            let summary = stream.consume()?;
            Ok(EagerResult { keys, records, summary })
        });
        let closed = session.close();
        let eager = result?;
        closed?;
        Ok(eager)
    }

    /// Bookmark manager shared by [`execute_query`](Self::execute_query)
    pub fn query_bookmark_manager(&self) -> Arc<dyn BookmarkManager> {
        Arc::clone(&self.inner.query_bookmarks)
    }

    /// Fetch a routing table and open a connection to every listed server
    pub fn verify_connectivity(&self) -> DriverResult<()> {
        let database = self.inner.config.database.as_deref();
        let table = self.inner.routing.refresh(database)?;
        let mut servers: Vec<&ServerAddress> = Vec::new();
        for address in table.writers.iter().chain(&table.readers) {
            if !servers.contains(&address) {
                servers.push(address);
            }
        }
        for address in &servers {
            drop(self.inner.pool.acquire_default(address)?);
        }
        info!(target: "arbor::pool", servers = servers.len(), "Connectivity verified");
        Ok(())
    }

    /// Current routing table for `database`
    pub fn routing_table(&self, database: Option<&str>) -> DriverResult<RoutingTable> {
        self.inner.routing.table(database)
    }

    /// The connection pool, e.g. for its metrics
    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    /// Settings the driver was built with
    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Retry policy of managed transactions
    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    /// Close every pooled connection and forget routing
    ///
    /// Sessions still open fail with `PoolClosed` when they next need a
    /// connection. Idempotent.
    pub fn close(&self) {
        self.inner.pool.close();
        self.inner.routing.clear();
        info!(target: "arbor::pool", "Driver closed");
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}
