//! Error types for filterstream-core

use std::time::Duration;
use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the host and its configuration.
///
/// Per-request failures are [`crate::Rejection`]s and never reach this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Address could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Listening socket could not be created
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// `serve` called while the accept loop is already running
    #[error("Server is already serving")]
    AlreadyServing,

    /// Connections were still open when the grace period ran out
    #[error("Shutdown timed out after {grace:?} with {remaining} connection(s) still open")]
    ShutdownTimeout { grace: Duration, remaining: u64 },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
