//! Error types for dbpool.
//!
//! Two layers live here:
//! - [`ErrorKind`], the closed outcome taxonomy every pool operation reports.
//! - [`DriverError`], the raw failure a driver session hands back, carrying
//!   the SQLSTATE that [`ErrorKind::from_state`] classifies.

use serde::Serialize;
use thiserror::Error;

/// SQLSTATE reported when a statement is issued on a session that is not open.
pub const STATE_CONNECTION_NOT_OPEN: &str = "08003";

/// Communication link failure; the session has to be re-established too.
pub const STATE_LINK_FAILURE: &str = "08S01";

/// Four-character form emitted by some legacy drivers.
const STATE_CONNECTION_NOT_OPEN_LEGACY: &str = "0800";

/// General driver error.
pub const STATE_GENERAL: &str = "HY000";

/// Row or column index out of range while reading a fetched row.
pub const STATE_INDEX_OUT_OF_RANGE: &str = "07009";

/// Data source or driver not found.
pub const STATE_DRIVER_NOT_FOUND: &str = "IM002";

/// Outcome of a pool operation.
///
/// Callers branch on the kind; messages only go to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ErrorKind {
    #[default]
    None,
    InvalidPoolSize,
    FailedToOpenConnection,
    QueryFailed,
    ConnectionClosed,
}

impl ErrorKind {
    /// Classify a driver SQLSTATE.
    ///
    /// Only "connection not open" states map to [`ErrorKind::ConnectionClosed`];
    /// everything else is a [`ErrorKind::QueryFailed`] and is logged with the
    /// raw state so it can be diagnosed.
    pub fn from_state(state: &str) -> Self {
        match state.trim() {
            STATE_CONNECTION_NOT_OPEN | STATE_LINK_FAILURE | STATE_CONNECTION_NOT_OPEN_LEGACY => {
                ErrorKind::ConnectionClosed
            }
            other => {
                tracing::warn!("Unmapped SQL state `{}`, reporting a failed query", other);
                ErrorKind::QueryFailed
            }
        }
    }

    /// `true` for [`ErrorKind::None`].
    pub fn is_ok(self) -> bool {
        self == ErrorKind::None
    }

    pub fn is_err(self) -> bool {
        !self.is_ok()
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ErrorKind::None => "no error",
            ErrorKind::InvalidPoolSize => "invalid pool size",
            ErrorKind::FailedToOpenConnection => "failed to open connection",
            ErrorKind::QueryFailed => "query failed",
            ErrorKind::ConnectionClosed => "connection closed",
        };
        f.write_str(text)
    }
}

/// A failure reported by a driver session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{state}] {message} (native {native})")]
pub struct DriverError {
    /// Five-character SQLSTATE.
    pub state: String,
    /// Driver specific error code, 0 when the driver has none.
    pub native: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            native: 0,
            message: message.into(),
        }
    }

    /// Attach the driver's native code.
    pub fn with_native(mut self, native: i32) -> Self {
        self.native = native;
        self
    }

    pub fn connection_not_open(message: impl Into<String>) -> Self {
        Self::new(STATE_CONNECTION_NOT_OPEN, message)
    }

    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::new(
            STATE_INDEX_OUT_OF_RANGE,
            format!("column index {} out of range (row has {} columns)", index, len),
        )
    }

    /// The taxonomy entry for this failure.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_state(&self.state)
    }
}

/// Errors raised outside the query path: configuration, I/O, start-up.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed TOML configuration.
    #[error("Invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A pool operation completed with a failure kind.
    #[error("Pool error: {0}")]
    Pool(ErrorKind),

    /// Driver failure surfaced directly.
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// The worker running a unit of work went away before answering.
    #[error("Worker lost: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::Pool(kind)
    }
}

/// Result type alias for dbpool operations.
pub type Result<T> = std::result::Result<T, Error>;
