//! Shared request state

use std::sync::Arc;
use std::time::Duration;

use portfolio_auth::TokenVerifier;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::proxy::UpstreamClient;

/// State handed to every handler and to the bearer middleware
#[derive(Debug, Clone)]
pub struct AppState {
    /// Token verifier, owning the signing key cache
    pub verifier: Arc<TokenVerifier>,
    /// Client for the pass-through routes
    pub upstream: UpstreamClient,
    /// Upper bound on one token verification
    pub verify_deadline: Duration,
}

impl AppState {
    /// Build the verifier and upstream client described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the verifier configuration is invalid or an HTTP
    /// client cannot be built.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let verifier = TokenVerifier::from_config(config.verifier.clone())?;
        Self::with_verifier(config, Arc::new(verifier))
    }

    /// Use an existing verifier, e.g. one over a custom key set source
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream HTTP client cannot be built.
    pub fn with_verifier(config: &ServerConfig, verifier: Arc<TokenVerifier>) -> ServerResult<Self> {
        Ok(Self {
            verifier,
            upstream: UpstreamClient::new(config)?,
            verify_deadline: config.verify_deadline,
        })
    }
}
