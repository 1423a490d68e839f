//! JWKS (JSON Web Key Set) fetching
//!
//! The identity provider publishes its public signing keys as a JWKS document.
//! [`HttpKeySetSource`] downloads it; caching is the job of
//! [`KeyStore`](crate::KeyStore).
//!
//! Any transport error, non-success status or undecodable body is reported as
//! [`VerifyError::KeySourceUnavailable`]. Transient failures (connection
//! errors, timeouts, 5xx, 429) are retried with jittered exponential backoff.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use reqwest::StatusCode;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

use crate::error::{ConfigError, VerifyError, VerifyResult};

/// Where a [`KeyStore`](crate::KeyStore) gets its keys from
#[async_trait]
pub trait KeySetSource: Send + Sync + fmt::Debug {
    /// Download the complete key set
    async fn fetch(&self) -> VerifyResult<JwkSet>;

    /// Human-readable location, for logs
    fn location(&self) -> &str;
}

/// Backoff schedule for transient key set failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor per retry
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter_factor;
        let capped_ms = (delay_ms * jitter).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms.max(0.0) as u64)
    }
}

/// Outcome of a single fetch attempt
enum Attempt {
    Done(JwkSet),
    Transient(String),
    Fatal(String),
}

/// Fetches a JWKS document over HTTP(S)
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use portfolio_auth::HttpKeySetSource;
///
/// let source = HttpKeySetSource::new(
///     "https://api.asgardeo.io/t/example/oauth2/jwks",
///     Duration::from_secs(10),
/// )?;
/// # Ok::<(), portfolio_auth::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpKeySetSource {
    jwks_uri: String,
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpKeySetSource {
    /// Create a source with the default retry policy
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URI does not parse, uses plain HTTP for
    /// a non-loopback host, or the HTTP client cannot be built.
    pub fn new(jwks_uri: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let jwks_uri = jwks_uri.into();
        validate_jwks_uri(&jwks_uri)?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("portfolio-auth/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            jwks_uri,
            http_client,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The JWKS endpoint
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    async fn attempt(&self) -> Attempt {
        let response = match self
            .http_client
            .get(&self.jwks_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                return Attempt::Transient(format!("JWKS request {kind}: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = format!("JWKS endpoint returned status {status}");
            return if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                Attempt::Transient(message)
            } else {
                Attempt::Fatal(message)
            };
        }

        match response.json::<JwkSet>().await {
            Ok(jwks) => Attempt::Done(jwks),
            Err(e) => Attempt::Fatal(format!("invalid JWKS document: {e}")),
        }
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> VerifyResult<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        let mut attempt = 0;
        loop {
            match self.attempt().await {
                Attempt::Done(jwks) => {
                    info!(
                        jwks_uri = %self.jwks_uri,
                        key_count = jwks.keys.len(),
                        "Successfully fetched JWKS"
                    );
                    return Ok(jwks);
                }
                Attempt::Transient(message) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        jwks_uri = %self.jwks_uri,
                        error = %message,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "JWKS fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Transient(message) | Attempt::Fatal(message) => {
                    error!(jwks_uri = %self.jwks_uri, error = %message, "JWKS fetch failed");
                    return Err(VerifyError::key_source(message));
                }
            }
        }
    }

    fn location(&self) -> &str {
        &self.jwks_uri
    }
}

/// Require https, except for loopback hosts used in development
fn validate_jwks_uri(jwks_uri: &str) -> Result<(), ConfigError> {
    let url = Url::parse(jwks_uri).map_err(|e| ConfigError::InvalidJwksUri {
        uri: jwks_uri.to_string(),
        message: e.to_string(),
    })?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => {
            debug!(jwks_uri, "Allowing plain HTTP JWKS URI on loopback host");
            Ok(())
        }
        "http" => Err(ConfigError::InsecureJwksUri(jwks_uri.to_string())),
        other => Err(ConfigError::InvalidJwksUri {
            uri: jwks_uri.to_string(),
            message: format!("unsupported scheme '{other}'"),
        }),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
