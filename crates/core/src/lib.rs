//! Core types for the Arbor driver
//!
//! This crate defines the data model shared by every other layer:
//! - Value / Record / ResultSummary: what flows back from the server
//! - Query / TransactionConfig: what is sent to it
//! - Bookmarks: causal-consistency tokens
//! - AccessMode: read/write routing hint
//! - DriverError: the error taxonomy (transient, server, client, resource)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod bookmarks;
pub mod error;
pub mod query;
pub mod record;
pub mod value;

pub use access::AccessMode;
pub use bookmarks::Bookmarks;
pub use error::{DriverError, DriverResult, ErrorCategory};
pub use query::{Query, TransactionConfig};
pub use record::{Record, ResultSummary};
pub use value::Value;
