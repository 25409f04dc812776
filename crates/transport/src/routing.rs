//! Routing tables: which members serve reads and writes

use crate::address::ServerAddress;
use arbor_core::AccessMode;
use std::time::Duration;

/// Cluster membership for one database as reported by a router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    /// Database the table describes
    pub database: Option<String>,
    /// Members that answer routing requests
    pub routers: Vec<ServerAddress>,
    /// Members that serve read transactions
    pub readers: Vec<ServerAddress>,
    /// Members that accept writes (the leader)
    pub writers: Vec<ServerAddress>,
    /// How long the table may be cached
    pub ttl: Duration,
}

impl RoutingTable {
    /// Table for a single server that does everything
    pub fn single(database: Option<String>, address: ServerAddress, ttl: Duration) -> Self {
        Self {
            database,
            routers: vec![address.clone()],
            readers: vec![address.clone()],
            writers: vec![address],
            ttl,
        }
    }

    /// Candidates for a transaction in `mode`
    pub fn servers_for(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// Drop `address` from the writers, e.g. after it lost leadership
    pub fn forget_writer(&mut self, address: &ServerAddress) {
        self.writers.retain(|a| a != address);
    }

    /// Drop `address` from every role, e.g. after it became unreachable
    pub fn forget(&mut self, address: &ServerAddress) {
        self.routers.retain(|a| a != address);
        self.readers.retain(|a| a != address);
        self.writers.retain(|a| a != address);
    }

    /// Whether the table can still serve `mode`
    pub fn can_serve(&self, mode: AccessMode) -> bool {
        !self.servers_for(mode).is_empty()
    }
}
