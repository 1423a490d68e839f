//! # portfolio-auth
//!
//! Bearer token verification against an OpenID Connect provider's published
//! signing keys.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             TokenVerifier               │
//! │  split → header → alg allow-list →      │
//! │  key lookup → signature + claims        │
//! └───────────────────┬─────────────────────┘
//!                     │ kid
//!           ┌─────────▼─────────┐
//!           │     KeyStore      │  snapshot cache, TTL,
//!           │                   │  coalesced refresh
//!           └─────────┬─────────┘
//!                     │ on miss / expiry
//!           ┌─────────▼─────────┐
//!           │   KeySetSource    │  HTTP JWKS fetch with
//!           │ HttpKeySetSource  │  timeout + backoff
//!           └───────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use portfolio_auth::{TokenVerifier, VerifierConfig, VerifyError};
//!
//! # tokio_test::block_on(async {
//! let config = VerifierConfig::new("https://api.asgardeo.io/t/example/oauth2/jwks")
//!     .with_issuer("https://api.asgardeo.io/t/example/oauth2/token");
//! let verifier = TokenVerifier::from_config(config)?;
//!
//! match verifier.verify("eyJ...").await {
//!     Ok(token) => println!("subject: {:?}", token.claims.sub),
//!     Err(VerifyError::TokenExpired) => println!("please sign in again"),
//!     Err(e) => println!("rejected ({})", e.reason()),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

#![warn(missing_docs)]

pub mod claims;
pub mod config;
pub mod error;
pub mod header;
pub mod jwks;
pub mod keystore;
pub mod verifier;

pub use claims::{Audience, Claims};
pub use config::VerifierConfig;
pub use error::{ConfigError, VerifyError, VerifyResult};
pub use header::TokenHeader;
pub use jwks::{HttpKeySetSource, KeySetSource, RetryPolicy};
pub use keystore::{KeyStore, SigningKey};
pub use verifier::{TokenVerifier, VerifiedToken};

// Re-exported so callers can name algorithms and key sets without a direct dependency
pub use jsonwebtoken::Algorithm;
pub use jsonwebtoken::jwk::JwkSet;
