//! Startup and runtime errors for the portfolio server

use std::net::SocketAddr;

use portfolio_auth::ConfigError;
use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Failures that stop the server from starting or keep it from running
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// Token verifier rejected its configuration
    #[error("Invalid verifier configuration: {0}")]
    Verifier(#[from] ConfigError),

    /// The upstream HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A configured CORS origin is not a valid header value
    #[error("Invalid CORS origin '{0}'")]
    InvalidCorsOrigin(String),

    /// The listen socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
