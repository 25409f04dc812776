//! Transport boundary for the Arbor driver
//!
//! The driver reaches the database exclusively through [`Connector`] and
//! [`Connection`]. This crate defines that boundary together with the small
//! value types that cross it, and ships [`memory`], an in-process cluster
//! used by tests and examples.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod cancel;
pub mod connection;
pub mod memory;
pub mod routing;

pub use address::{AuthToken, ServerAddress, DEFAULT_PORT};
pub use cancel::CancelToken;
pub use connection::{BeginRequest, Connection, Connector, PullResponse, QueryId, RunResponse};
pub use routing::RoutingTable;
