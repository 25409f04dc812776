//! Access mode used to route transactions
//!
//! The mode picks which cluster member serves a transaction: reads may go to
//! any member, writes go to the leader. It is a load-distribution hint, not
//! an authorization boundary; a server may still accept a write statement
//! sent in a read-routed transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a transaction is routed as a read or a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Route to any member that can serve reads
    Read,
    /// Route to the leader (default)
    #[default]
    Write,
}

impl AccessMode {
    /// True for [`AccessMode::Read`]
    pub fn is_read(self) -> bool {
        matches!(self, AccessMode::Read)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}
