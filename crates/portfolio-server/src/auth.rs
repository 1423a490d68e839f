//! Bearer token middleware
//!
//! Requests must carry `Authorization: Bearer <token>`. On success the
//! verified [`Claims`] are inserted as a request extension; on failure the
//! client gets a 401 with a fixed message, and the actual reason only goes to
//! the log.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use portfolio_auth::Claims;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::AppState;

const INVALID_TOKEN_CHALLENGE: &str = r#"Bearer error="invalid_token""#;

/// Why a request was turned away
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No `Authorization` header
    #[error("Missing Authorization header")]
    MissingHeader,

    /// Header present but not `Bearer <token>`
    #[error("Invalid Authorization header format")]
    InvalidFormat,

    /// Token failed verification
    #[error("Invalid or expired token")]
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let mut resp =
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": self.to_string() }))).into_response();

        if self == Self::InvalidToken {
            resp.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(INVALID_TOKEN_CHALLENGE),
            );
        }

        resp
    }
}

/// Extract the token from `Authorization: Bearer <token>`
///
/// The header value must split on single spaces into exactly two parts, the
/// first being `Bearer`.
///
/// # Errors
///
/// Returns [`AuthRejection::MissingHeader`] or [`AuthRejection::InvalidFormat`].
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthRejection> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthRejection::MissingHeader)?;
    let value = value.to_str().map_err(|_| AuthRejection::InvalidFormat)?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        _ => Err(AuthRejection::InvalidFormat),
    }
}

/// Reject requests without a valid bearer token
///
/// Use with [`axum::middleware::from_fn_with_state`].
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthRejection> {
    let token = bearer_token(request.headers())?.to_owned();

    let verified = state
        .verifier
        .verify_within(&token, state.verify_deadline)
        .await
        .map_err(|e| {
            warn!(
                reason = e.reason(),
                error = %e,
                path = %request.uri().path(),
                "Token verification failed"
            );
            AuthRejection::InvalidToken
        })?;

    debug!(subject = ?verified.claims.sub, kid = %verified.key_id, "Request authenticated");
    request.extensions_mut().insert(verified.claims);
    Ok(next.run(request).await)
}

/// `GET /api/me`: the caller's verified claims
pub async fn me(axum::Extension(claims): axum::Extension<Claims>) -> Json<Claims> {
    Json(claims)
}
