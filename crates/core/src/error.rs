//! Error taxonomy for the driver
//!
//! Every failure surfaced by the driver is a [`DriverError`]. Errors are
//! classified once, where they originate (usually the transport), and the
//! classification travels with them:
//!
//! | Category | Variants | Retried by managed transactions |
//! |----------|----------|---------------------------------|
//! | Transient | `Transient`, `Deadlock`, `LeaderSwitch`, `ConnectionReset`, `ConnectionFailed` | yes |
//! | Server terminal | `Database`, `RetryExhausted` | no |
//! | Client | `SessionBusy`, `SessionClosed`, `InvalidTransactionState`, `ResultEscaped`, `ResultNotSingle`, `ResultConsumed`, `Interrupted`, `Work`, `InvalidConfig` | no |
//! | Resource | `PoolTimeout`, `PoolClosed` | no |
//!
//! Only the managed-transaction executor acts on the classification; all
//! other layers pass errors through untouched.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Broad class of a [`DriverError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Retryable: the same work may succeed if run again
    Transient,
    /// Rejected by the server; running it again will fail the same way
    ServerTerminal,
    /// Misuse of the driver API; a programming error
    Client,
    /// Local resource exhaustion; callers may apply their own backpressure
    Resource,
}

/// Errors surfaced by the driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    // ==================== Transient ====================
    /// Server-classified transient failure
    #[error("transient error [{code}]: {message}")]
    Transient {
        /// Server status code
        code: String,
        /// Server message
        message: String,
    },

    /// Deadlock detected between concurrent transactions
    #[error("deadlock detected: {message}")]
    Deadlock {
        /// Server message
        message: String,
    },

    /// The member written to is no longer the leader
    #[error("{address} is no longer the leader")]
    LeaderSwitch {
        /// Former leader address
        address: String,
    },

    /// Connection dropped mid-transaction
    #[error("connection to {address} reset: {reason}")]
    ConnectionReset {
        /// Peer address
        address: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// A new connection could not be opened
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailed {
        /// Peer address
        address: String,
        /// Reason reported by the transport
        reason: String,
    },

    // ==================== Server terminal ====================
    /// Terminal server error (syntax error, constraint violation, ...)
    #[error("database error [{code}]: {message}")]
    Database {
        /// Server status code
        code: String,
        /// Server message
        message: String,
    },

    /// Managed transaction ran out of retry budget
    #[error("transaction failed after {attempts} attempt(s) in {elapsed:?}: {last_error}")]
    RetryExhausted {
        /// Attempts made, including the first
        attempts: usize,
        /// Time spent including backoff waits
        elapsed: Duration,
        /// The transient error of the final attempt
        #[source]
        last_error: Box<DriverError>,
    },

    // ==================== Client ====================
    /// A transaction is already open on this session
    #[error("session already has an open transaction")]
    SessionBusy,

    /// Session has been closed
    #[error("session is closed")]
    SessionClosed,

    /// Operation not allowed in the transaction's current state
    #[error("transaction is {state}")]
    InvalidTransactionState {
        /// State the transaction was in
        state: String,
    },

    /// A live result stream outlived the managed work function that created it
    #[error("result stream escaped its transaction function")]
    ResultEscaped,

    /// `single` did not find exactly one record
    #[error("expected exactly one record: {reason}")]
    ResultNotSingle {
        /// What was found instead
        reason: String,
    },

    /// Result is no longer readable (consumed, or its transaction ended)
    #[error("result has been consumed or its transaction has ended")]
    ResultConsumed,

    /// A blocked operation was interrupted from another thread
    #[error("operation interrupted")]
    Interrupted,

    /// Error raised by application code inside a work function
    #[error("work function failed: {message}")]
    Work {
        /// Application message
        message: String,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong
        reason: String,
    },

    // ==================== Resource ====================
    /// No pooled connection became available in time
    #[error("timed out after {waited:?} waiting for a connection to {address}")]
    PoolTimeout {
        /// Target address
        address: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// The pool has been closed
    #[error("connection pool is closed")]
    PoolClosed,
}

impl DriverError {
    /// Construct a [`DriverError::Transient`]
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Construct a [`DriverError::Database`]
    pub fn database(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::Database {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap an application error raised inside a work function
    pub fn work(message: impl Into<String>) -> Self {
        DriverError::Work {
            message: message.into(),
        }
    }

    /// Classification of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            DriverError::Transient { .. }
            | DriverError::Deadlock { .. }
            | DriverError::LeaderSwitch { .. }
            | DriverError::ConnectionReset { .. }
            | DriverError::ConnectionFailed { .. } => ErrorCategory::Transient,
            DriverError::Database { .. } | DriverError::RetryExhausted { .. } => {
                ErrorCategory::ServerTerminal
            }
            DriverError::PoolTimeout { .. } | DriverError::PoolClosed => ErrorCategory::Resource,
            DriverError::SessionBusy
            | DriverError::SessionClosed
            | DriverError::InvalidTransactionState { .. }
            | DriverError::ResultEscaped
            | DriverError::ResultNotSingle { .. }
            | DriverError::ResultConsumed
            | DriverError::Interrupted
            | DriverError::Work { .. }
            | DriverError::InvalidConfig { .. } => ErrorCategory::Client,
        }
    }

    /// Whether a managed transaction should run its work again
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Whether the connection that produced this error must be discarded
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::ConnectionReset { .. } | DriverError::Interrupted
        )
    }

    /// Stable short name of the variant, for logs and metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            DriverError::Transient { .. } => "Transient",
            DriverError::Deadlock { .. } => "Deadlock",
            DriverError::LeaderSwitch { .. } => "LeaderSwitch",
            DriverError::ConnectionReset { .. } => "ConnectionReset",
            DriverError::ConnectionFailed { .. } => "ConnectionFailed",
            DriverError::Database { .. } => "Database",
            DriverError::RetryExhausted { .. } => "RetryExhausted",
            DriverError::SessionBusy => "SessionBusy",
            DriverError::SessionClosed => "SessionClosed",
            DriverError::InvalidTransactionState { .. } => "InvalidTransactionState",
            DriverError::ResultEscaped => "ResultEscaped",
            DriverError::ResultNotSingle { .. } => "ResultNotSingle",
            DriverError::ResultConsumed => "ResultConsumed",
            DriverError::Interrupted => "Interrupted",
            DriverError::Work { .. } => "Work",
            DriverError::InvalidConfig { .. } => "InvalidConfig",
            DriverError::PoolTimeout { .. } => "PoolTimeout",
            DriverError::PoolClosed => "PoolClosed",
        }
    }
}
