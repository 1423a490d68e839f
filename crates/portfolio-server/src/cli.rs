//! Command-line interface
//!
//! Every setting can also come from the environment, so the server runs the
//! same way under a process manager as from a shell.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use portfolio_auth::VerifierConfig;
use tracing::{Level, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::config::{DEFAULT_ISSUER_DOMAIN, DEFAULT_PORT, ServerConfig, verify_deadline_for};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// portfolio-server - Portfolio backend with OIDC token verification
#[derive(Parser, Debug, Clone)]
#[command(
    name = "portfolio-server",
    version,
    about = "Portfolio backend: OIDC metadata pass-through and bearer-protected API"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_addr: IpAddr,

    /// Identity provider base URL
    #[arg(long, env = "ISSUER_DOMAIN")]
    pub issuer_domain: Option<String>,

    /// Legacy name for --issuer-domain
    #[arg(long, env = "ASGARDIO_DOMAIN", hide = true)]
    pub asgardio_domain: Option<String>,

    /// Key set used for verification (default: <issuer-domain>/oauth2/jwks)
    #[arg(long, env = "JWKS_URI")]
    pub jwks_uri: Option<String>,

    /// Required `iss` claim
    #[arg(long, env = "TOKEN_ISSUER")]
    pub token_issuer: Option<String>,

    /// Accepted `aud` values, comma separated
    #[arg(long, env = "TOKEN_AUDIENCE", value_delimiter = ',')]
    pub token_audience: Vec<String>,

    /// Seconds a fetched key set stays fresh (0 keeps keys until restart)
    #[arg(long, env = "KEY_CACHE_TTL_SECS", default_value_t = 600)]
    pub key_cache_ttl_secs: u64,

    /// Seconds between background key refreshes (0 disables)
    #[arg(long, env = "KEY_REFRESH_INTERVAL_SECS", default_value_t = 0)]
    pub key_refresh_interval_secs: u64,

    /// Timeout in seconds for identity provider requests
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Seconds allowed for verifying one request's token (default: enough for
    /// every key fetch attempt plus one second)
    #[arg(long, env = "VERIFY_DEADLINE_SECS")]
    pub verify_deadline_secs: Option<u64>,

    /// Allowed CORS origins, comma separated (default: any)
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Enable verbose logging (-v, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log format
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Identity provider domain, falling back to the legacy variable and then the default
    pub fn domain(&self) -> &str {
        self.issuer_domain
            .as_deref()
            .or(self.asgardio_domain.as_deref())
            .unwrap_or(DEFAULT_ISSUER_DOMAIN)
    }

    /// Translate flags into a [`ServerConfig`]
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.domain());
        config.bind = SocketAddr::new(self.bind_addr, self.port);

        let fetch_timeout = Duration::from_secs(self.fetch_timeout_secs);
        let jwks_uri = self.jwks_uri.clone().unwrap_or_else(|| config.jwks_url());
        let key_ttl = (self.key_cache_ttl_secs > 0)
            .then(|| Duration::from_secs(self.key_cache_ttl_secs));

        let mut verifier = VerifierConfig::new(jwks_uri)
            .with_key_ttl(key_ttl)
            .with_fetch_timeout(fetch_timeout);
        if let Some(issuer) = &self.token_issuer {
            verifier = verifier.with_issuer(issuer.clone());
        }
        for audience in self.token_audience.iter().filter(|a| !a.is_empty()) {
            verifier = verifier.with_audience(audience.clone());
        }

        config.verifier = verifier;
        config.key_refresh_interval = (self.key_refresh_interval_secs > 0)
            .then(|| Duration::from_secs(self.key_refresh_interval_secs));
        config.cors_origins = self
            .cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        config.upstream_timeout = fetch_timeout;
        config.verify_deadline = self.verify_deadline(&config.verifier);
        config
    }

    /// Requested deadline, raised to what a full key fetch needs
    fn verify_deadline(&self, verifier: &VerifierConfig) -> Duration {
        let floor = verify_deadline_for(verifier);
        match self.verify_deadline_secs.map(Duration::from_secs) {
            Some(requested) if requested < floor => {
                warn!(
                    requested_secs = requested.as_secs(),
                    floor_secs = floor.as_secs(),
                    "Verify deadline shorter than the key fetch budget, raising it"
                );
                floor
            }
            Some(requested) => requested,
            None => floor,
        }
    }

    /// Level used when `RUST_LOG` is not set
    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::INFO,
                1 => Level::DEBUG,
                _ => Level::TRACE,
            }
        }
    }

    /// Initialize the tracing subscriber
    ///
    /// `RUST_LOG` overrides the verbosity flags.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.log_level()).into())
            .from_env_lossy();

        match self.log_format {
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init(),
        }
    }
}
