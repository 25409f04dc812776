//! Session and transaction layer of the Arbor driver
//!
//! This crate turns pooled transport connections into the API application
//! code uses:
//! - Driver: owns the pool, routing cache and retry policy
//! - Session: sequential context holding bookmarks, one transaction at a time
//! - Transaction / ManagedTransaction: explicit and retried units of work
//! - ResultStream: single-pass, lazily pulled records
//! - BookmarkManager: causal chaining across sessions
//! - DriverConfig: `arbor.toml` settings
//!
//! Everything is synchronous; blocking happens only in pool acquisition,
//! backoff waits and record pulls.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bookmark_manager;
pub mod config;
pub mod driver;
pub mod executor;
pub mod result;
pub mod retry;
pub mod routing;
pub mod session;
pub mod transaction;

pub use bookmark_manager::{BookmarkManager, InMemoryBookmarkManager};
pub use config::{DriverConfig, PoolSection, RetrySection, CONFIG_FILE_NAME};
pub use driver::{Driver, DriverBuilder, EagerResult, QueryConfig};
pub use executor::RetryExecutor;
pub use result::ResultStream;
pub use retry::{Clock, ManualClock, RetryConfig, SystemClock};
pub use routing::RoutingCache;
pub use session::{InterruptHandle, Session, SessionConfig};
pub use transaction::{ManagedTransaction, Transaction, TransactionState};
