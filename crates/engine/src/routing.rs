//! Per-database routing table cache
//!
//! Tables are fetched lazily through the [`Connector`], kept until their
//! TTL (capped by the driver config) runs out, and dropped early when a
//! leader switch shows the table is stale. Reads are spread round robin
//! over the readers; writes go to the writer.

use crate::retry::Clock;
use arbor_core::{AccessMode, DriverError, DriverResult};
use arbor_transport::{AuthToken, Connector, RoutingTable, ServerAddress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct CachedTable {
    table: RoutingTable,
    expires_at: Instant,
}

/// Routing tables keyed by database name (`None` = server default)
pub struct RoutingCache {
    connector: Arc<dyn Connector>,
    auth: AuthToken,
    clock: Arc<dyn Clock>,
    max_ttl: Duration,
    tables: Mutex<HashMap<Option<String>, CachedTable>>,
    next_reader: AtomicUsize,
}

impl RoutingCache {
    /// Empty cache fetching through `connector`
    pub fn new(connector: Arc<dyn Connector>, auth: AuthToken, clock: Arc<dyn Clock>, max_ttl: Duration) -> Self {
        Self {
            connector,
            auth,
            clock,
            max_ttl,
            tables: Mutex::new(HashMap::new()),
            next_reader: AtomicUsize::new(0),
        }
    }

    /// Current table for `database`, refreshing it when missing or expired
    pub fn table(&self, database: Option<&str>) -> DriverResult<RoutingTable> {
        let key = database.map(str::to_string);
        {
            let tables = self.tables.lock();
            if let Some(cached) = tables.get(&key) {
                if self.clock.now() < cached.expires_at {
                    return Ok(cached.table.clone());
                }
            }
        }
        self.refresh(database)
    }

    /// Fetch a new table for `database` and cache it
    pub fn refresh(&self, database: Option<&str>) -> DriverResult<RoutingTable> {
        let table = self.connector.fetch_routing_table(database, &self.auth)?;
        let ttl = table.ttl.min(self.max_ttl);
        debug!(
            target: "arbor::routing",
            database = database.unwrap_or("<default>"),
            readers = table.readers.len(),
            writers = table.writers.len(),
            ?ttl,
            "Routing table refreshed"
        );
        self.tables.lock().insert(
            database.map(str::to_string),
            CachedTable {
                table: table.clone(),
                expires_at: self.clock.now() + ttl,
            },
        );
        Ok(table)
    }

    /// Pick a server for a transaction in `mode`
    ///
    /// # Errors
    /// `ConnectionFailed` (retryable) when even a fresh table lists no
    /// server for `mode`, e.g. while a leader election is in progress.
    pub fn select(&self, database: Option<&str>, mode: AccessMode) -> DriverResult<ServerAddress> {
        let mut table = self.table(database)?;
        if !table.can_serve(mode) {
            table = self.refresh(database)?;
        }
        let servers = table.servers_for(mode);
        if servers.is_empty() {
            return Err(DriverError::ConnectionFailed {
                address: database.unwrap_or("<default>").to_string(),
                reason: format!("no server available for {} transactions", mode),
            });
        }
        let index = match mode {
            AccessMode::Read => self.next_reader.fetch_add(1, Ordering::Relaxed) % servers.len(),
            AccessMode::Write => 0,
        };
        Ok(servers[index].clone())
    }

    /// Drop the cached table for `database`; the next lookup refetches it
    pub fn invalidate(&self, database: Option<&str>) {
        if self.tables.lock().remove(&database.map(str::to_string)).is_some() {
            info!(
                target: "arbor::routing",
                database = database.unwrap_or("<default>"),
                "Routing table invalidated"
            );
        }
    }

    /// Remove an unreachable server from the cached table for `database`
    pub fn forget(&self, database: Option<&str>, address: &ServerAddress) {
        let mut tables = self.tables.lock();
        if let Some(cached) = tables.get_mut(&database.map(str::to_string)) {
            cached.table.forget(address);
            debug!(target: "arbor::routing", %address, "Server removed from routing table");
        }
    }

    /// Drop every cached table
    pub fn clear(&self) {
        self.tables.lock().clear();
    }
}
