//! OIDC discovery and JWKS pass-through
//!
//! Browsers cannot always reach the identity provider's metadata directly
//! because of CORS, so the server fetches it and relays the JSON unchanged.
//! Any upstream problem becomes a `502` whose body says what went wrong.

use std::time::Duration;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::state::AppState;

const STATUS_BODY_LIMIT: usize = 200;
const LOG_BODY_LIMIT: usize = 400;
const NON_JSON_BODY_LIMIT: usize = 800;

/// Documents relayed from the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    /// `/.well-known/openid-configuration`
    Discovery,
    /// The provider's key set
    Jwks,
}

impl Upstream {
    /// Noun used in "Failed to fetch ..." messages
    pub fn fetch_label(self) -> &'static str {
        match self {
            Self::Discovery => "OIDC configuration",
            Self::Jwks => "JWKS",
        }
    }

    /// Noun used in "... returned non-JSON" messages
    pub fn source_label(self) -> &'static str {
        match self {
            Self::Discovery => "OIDC discovery",
            Self::Jwks => "JWKS",
        }
    }
}

/// Pass-through failure, rendered as `502 Bad Gateway`
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Upstream answered with a non-2xx status
    #[error("Failed to fetch {}: upstream returned {status}", .upstream.fetch_label())]
    Status {
        /// Which document
        upstream: Upstream,
        /// Upstream status
        status: StatusCode,
        /// Upstream body, truncated
        body: String,
    },

    /// Upstream answered 2xx with something that is not JSON
    #[error("{} returned non-JSON", .upstream.source_label())]
    NotJson {
        /// Which document
        upstream: Upstream,
        /// Upstream body, truncated
        body: String,
    },

    /// The request never got a response
    #[error("Failed to fetch {}: {detail}", .upstream.fetch_label())]
    Transport {
        /// Which document
        upstream: Upstream,
        /// Client error text
        detail: String,
    },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match self {
            Self::Status {
                upstream,
                status,
                body,
            } => json!({
                "error": format!("Failed to fetch {}", upstream.fetch_label()),
                "status": status.as_u16(),
                "statusText": status.canonical_reason().unwrap_or(""),
                "body": body,
            }),
            Self::NotJson { upstream, body } => json!({
                "error": format!("{} returned non-JSON", upstream.source_label()),
                "body": body,
            }),
            Self::Transport { upstream, detail } => json!({
                "error": format!("Failed to fetch {}", upstream.fetch_label()),
                "detail": detail,
            }),
        };

        (StatusCode::BAD_GATEWAY, Json(body)).into_response()
    }
}

/// HTTP client for the identity provider's public documents
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    discovery_url: String,
    jwks_url: String,
}

impl UpstreamClient {
    /// Build a client for the documents `config` points at
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ServerConfig) -> ServerResult<Self> {
        Ok(Self {
            http: build_client(config.upstream_timeout)?,
            discovery_url: config.discovery_url(),
            jwks_url: config.jwks_url(),
        })
    }

    /// Upstream URL for `upstream`
    pub fn url(&self, upstream: Upstream) -> &str {
        match upstream {
            Upstream::Discovery => &self.discovery_url,
            Upstream::Jwks => &self.jwks_url,
        }
    }

    /// Fetch `upstream` and parse it as JSON
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError`] on transport failure, non-2xx status or a body
    /// that is not JSON.
    pub async fn fetch_json(&self, upstream: Upstream) -> Result<Value, ProxyError> {
        let url = self.url(upstream);
        info!(upstream = %url, "Proxying {} request", upstream.source_label());

        let response = self.http.get(url).send().await.map_err(|e| {
            error!(upstream = %url, error = %e, "Failed to fetch {}", upstream.fetch_label());
            ProxyError::Transport {
                upstream,
                detail: e.to_string(),
            }
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(
                upstream = %url,
                status = status.as_u16(),
                body = %text,
                "{} fetch failed",
                upstream.source_label()
            );
            return Err(ProxyError::Status {
                upstream,
                status,
                body: truncate(&text, STATUS_BODY_LIMIT),
            });
        }

        serde_json::from_str(&text).map_err(|_| {
            error!(
                upstream = %url,
                body = %truncate(&text, LOG_BODY_LIMIT),
                "{} returned non-JSON body",
                upstream.source_label()
            );
            ProxyError::NotJson {
                upstream,
                body: truncate(&text, NON_JSON_BODY_LIMIT),
            }
        })
    }
}

fn build_client(timeout: Duration) -> ServerResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .build()?)
}

/// First `limit` characters of `text`
fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// `GET /auth/.well-known/openid-configuration`
pub async fn discovery(State(state): State<AppState>) -> Result<Json<Value>, ProxyError> {
    state.upstream.fetch_json(Upstream::Discovery).await.map(Json)
}

/// `GET /auth/jwks`
pub async fn jwks(State(state): State<AppState>) -> Result<Json<Value>, ProxyError> {
    state.upstream.fetch_json(Upstream::Jwks).await.map(Json)
}
