//! Verifier configuration
//!
//! Defaults match a single OIDC provider signing access tokens with RS256.

use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::jwks::RetryPolicy;

/// Settings for [`TokenVerifier`](crate::TokenVerifier)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// JWKS endpoint of the trusted issuer
    pub jwks_uri: String,

    /// Expected `iss` claim, unchecked when `None`
    #[serde(default)]
    pub issuer: Option<String>,

    /// Accepted `aud` values, unchecked when empty
    #[serde(default)]
    pub audiences: Vec<String>,

    /// Signing algorithms a token header may name
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,

    /// Clock skew tolerated on `exp` and `nbf`
    #[serde(default = "default_leeway")]
    pub leeway: Duration,

    /// How long a fetched key set is trusted; `None` keeps keys for the process lifetime
    #[serde(default = "default_key_ttl")]
    pub key_ttl: Option<Duration>,

    /// Minimum spacing between refreshes triggered by unknown key ids
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval: Duration,

    /// Per-request timeout for the key set fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,

    /// Retries after a transient key set failure
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_leeway() -> Duration {
    Duration::from_secs(60)
}

fn default_key_ttl() -> Option<Duration> {
    Some(Duration::from_secs(600))
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_fetch_retries() -> u32 {
    2
}

impl VerifierConfig {
    /// Configuration for a JWKS URI with every other setting at its default
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            issuer: None,
            audiences: Vec::new(),
            allowed_algorithms: default_algorithms(),
            leeway: default_leeway(),
            key_ttl: default_key_ttl(),
            min_refresh_interval: default_min_refresh_interval(),
            fetch_timeout: default_fetch_timeout(),
            fetch_retries: default_fetch_retries(),
        }
    }

    /// Require this `iss` claim
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Accept this `aud` value (may be called repeatedly)
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }

    /// Replace the algorithm allow-list
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Set clock skew tolerance
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Set the key cache lifetime
    pub fn with_key_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.key_ttl = ttl;
        self
    }

    /// Set the unknown-kid refresh spacing
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Set the key set request timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the number of retries on transient key set failures
    pub fn with_fetch_retries(mut self, retries: u32) -> Self {
        self.fetch_retries = retries;
        self
    }

    /// Longest a single key set refresh can take
    ///
    /// Every attempt may run into `fetch_timeout`, and each retry waits at
    /// most the retry policy's `max_delay` first.
    pub fn fetch_budget(&self) -> Duration {
        let attempts = self.fetch_retries.saturating_add(1);
        let backoff = RetryPolicy::default().max_delay * self.fetch_retries;
        self.fetch_timeout.saturating_mul(attempts) + backoff
    }

    /// Check the settings that do not need the network
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the allow-list is empty or names a symmetric
    /// algorithm, or if the fetch timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_algorithms.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }

        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| is_symmetric(**alg))
        {
            return Err(ConfigError::SymmetricAlgorithm(format!("{alg:?}")));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fetch_timeout",
                message: "must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

/// Shared-secret algorithms, never valid for tokens minted by a third party
pub(crate) fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
