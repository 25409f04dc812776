//! Connection pooling for the Arbor driver
//!
//! A [`ConnectionPool`] keeps a bounded set of transport connections per
//! server address. Callers borrow a [`PooledConnection`]; dropping it hands
//! the connection back (reset and idle) or discards it when broken.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod pool;

pub use config::PoolConfig;
pub use pool::{ConnectionPool, PooledConnection};
