//! Server configuration
//!
//! [`ServerConfig`] is what the server runs on. The CLI builds one from flags
//! and environment variables; tests build one directly.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use portfolio_auth::VerifierConfig;

/// Identity provider tenant used when none is configured
pub const DEFAULT_ISSUER_DOMAIN: &str = "https://api.asgardeo.io/t/org02fl3";

/// Default listen port
pub const DEFAULT_PORT: u16 = 4000;

/// Slack on top of the key fetch budget for the signature and claims checks
pub const VERIFY_DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Runtime configuration for the portfolio backend
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: SocketAddr,
    /// Identity provider base URL, without trailing slash
    pub issuer_domain: String,
    /// Token verification settings
    pub verifier: VerifierConfig,
    /// Background key refresh period; `None` refreshes on demand only
    pub key_refresh_interval: Option<Duration>,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    /// Timeout for the discovery and JWKS pass-through requests
    pub upstream_timeout: Duration,
    /// Upper bound on verifying one request's token, key fetch included
    ///
    /// Should not be shorter than [`verify_deadline_for`] of `verifier`, or a
    /// cold key fetch against a slow provider is cut off before it can fail
    /// or retry.
    pub verify_deadline: Duration,
}

impl ServerConfig {
    /// Configuration for `issuer_domain` with every other setting at its default
    pub fn new(issuer_domain: impl Into<String>) -> Self {
        let issuer_domain = normalize_domain(&issuer_domain.into());
        let verifier = VerifierConfig::new(format!("{issuer_domain}/oauth2/jwks"));

        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            issuer_domain,
            key_refresh_interval: None,
            cors_origins: Vec::new(),
            upstream_timeout: Duration::from_secs(10),
            verify_deadline: verify_deadline_for(&verifier),
            verifier,
        }
    }

    /// Upstream OIDC discovery document
    pub fn discovery_url(&self) -> String {
        format!(
            "{}/oauth2/oidcdiscovery/.well-known/openid-configuration",
            self.issuer_domain
        )
    }

    /// Upstream key set served by `/auth/jwks`
    ///
    /// Always derived from the domain, even when verification uses an
    /// overridden JWKS URI.
    pub fn jwks_url(&self) -> String {
        format!("{}/oauth2/jwks", self.issuer_domain)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ISSUER_DOMAIN)
    }
}

/// Deadline that lets a full key set refresh, retries included, finish
pub fn verify_deadline_for(verifier: &VerifierConfig) -> Duration {
    verifier.fetch_budget() + VERIFY_DEADLINE_MARGIN
}

fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_urls() {
        let config = ServerConfig::default();
        assert_eq!(config.bind.port(), 4000);
        assert_eq!(
            config.discovery_url(),
            "https://api.asgardeo.io/t/org02fl3/oauth2/oidcdiscovery/.well-known/openid-configuration"
        );
        assert_eq!(
            config.jwks_url(),
            "https://api.asgardeo.io/t/org02fl3/oauth2/jwks"
        );
        assert_eq!(config.verifier.jwks_uri, config.jwks_url());
    }

    #[test]
    fn test_default_deadline_outlasts_key_fetch() {
        let config = ServerConfig::default();
        assert!(config.verify_deadline > config.verifier.fetch_budget());
        assert_eq!(config.verify_deadline, Duration::from_secs(35));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = ServerConfig::new("https://idp.example.com/t/acme/");
        assert_eq!(config.issuer_domain, "https://idp.example.com/t/acme");
        assert_eq!(config.jwks_url(), "https://idp.example.com/t/acme/oauth2/jwks");
    }
}
