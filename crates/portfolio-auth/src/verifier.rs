//! Bearer token verification
//!
//! [`TokenVerifier::verify`] runs the full pipeline:
//!
//! 1. Split the token into three non-empty segments
//! 2. Decode the header and require a `kid`
//! 3. Check `alg` against the asymmetric allow-list
//! 4. Resolve the signing key (the only step that may touch the network)
//! 5. Verify signature, `exp`/`nbf`, and issuer/audience when configured
//!
//! The algorithm check runs before key resolution, so a token naming a
//! shared-secret algorithm is rejected without a JWKS fetch regardless of
//! which kid it claims.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, TokenData, Validation, decode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::claims::Claims;
use crate::config::{VerifierConfig, is_symmetric};
use crate::error::{ConfigError, VerifyError, VerifyResult};
use crate::header::{decode_header, split_token};
use crate::jwks::{HttpKeySetSource, KeySetSource, RetryPolicy};
use crate::keystore::KeyStore;

/// A token that passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    /// Decoded payload
    pub claims: Claims,
    /// Key id that signed the token
    pub key_id: String,
    /// Algorithm that signed the token
    pub algorithm: Algorithm,
}

/// Verifies bearer tokens issued by a single trusted identity provider
///
/// Cheap to share: wrap in an `Arc` and hand a clone to every request handler.
///
/// # Example
///
/// ```rust,no_run
/// # use portfolio_auth::{TokenVerifier, VerifierConfig};
/// # tokio_test::block_on(async {
/// let verifier = TokenVerifier::from_config(VerifierConfig::new(
///     "https://api.asgardeo.io/t/example/oauth2/jwks",
/// ))?;
///
/// match verifier.verify("eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIn0...").await {
///     Ok(token) => println!("signed in as {:?}", token.claims.sub),
///     Err(e) => println!("rejected: {}", e.reason()),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug)]
pub struct TokenVerifier {
    config: VerifierConfig,
    keys: Arc<KeyStore>,
}

impl TokenVerifier {
    /// Create a verifier that fetches keys from `config.jwks_uri` over HTTP
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn from_config(config: VerifierConfig) -> Result<Self, ConfigError> {
        let retry = RetryPolicy {
            max_retries: config.fetch_retries,
            ..RetryPolicy::default()
        };
        let source = HttpKeySetSource::new(config.jwks_uri.clone(), config.fetch_timeout)?
            .with_retry(retry);
        Self::new(Arc::new(source), config)
    }

    /// Create a verifier over an arbitrary key set source
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(source: Arc<dyn KeySetSource>, config: VerifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = Arc::new(KeyStore::new(
            source,
            config.key_ttl,
            config.min_refresh_interval,
        ));
        Ok(Self { config, keys })
    }

    /// Verify a bearer token
    ///
    /// # Errors
    ///
    /// Returns the [`VerifyError`] describing the first check that failed.
    pub async fn verify(&self, token: &str) -> VerifyResult<VerifiedToken> {
        let parts = split_token(token)?;
        let (header, kid) = decode_header(&parts)?;

        let algorithm = self.allowed_algorithm(&header.alg)?;

        let key = self.keys.get(&kid).await?;
        if !key.permits(&header.alg) {
            warn!(
                kid = %kid,
                header_alg = %header.alg,
                key_alg = ?key.algorithm(),
                "Token algorithm does not match key"
            );
            return Err(VerifyError::unsupported_algorithm(header.alg));
        }

        let validation = self.validation(algorithm);
        let data: TokenData<Claims> = decode(token, key.decoding_key(), &validation)
            .map_err(|e| VerifyError::from_jwt(&e, &header.alg))?;

        debug!(
            kid = %kid,
            subject = ?data.claims.sub,
            algorithm = ?algorithm,
            "Token verified"
        );

        Ok(VerifiedToken {
            claims: data.claims,
            key_id: kid,
            algorithm,
        })
    }

    /// Verify, giving up as soon as `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::VerificationAborted`] on cancellation, otherwise
    /// whatever [`verify`](Self::verify) returns.
    pub async fn verify_with_cancel(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> VerifyResult<VerifiedToken> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Token verification cancelled by caller");
                Err(VerifyError::VerificationAborted("cancelled by caller".into()))
            }
            result = self.verify(token) => result,
        }
    }

    /// Verify with a deadline covering the whole pipeline
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::VerificationAborted`] if `deadline` elapses,
    /// otherwise whatever [`verify`](Self::verify) returns.
    pub async fn verify_within(
        &self,
        token: &str,
        deadline: Duration,
    ) -> VerifyResult<VerifiedToken> {
        tokio::time::timeout(deadline, self.verify(token))
            .await
            .unwrap_or_else(|_| {
                warn!(deadline_ms = deadline.as_millis() as u64, "Token verification timed out");
                Err(VerifyError::VerificationAborted(format!(
                    "deadline of {deadline:?} elapsed"
                )))
            })
    }

    /// The signing key cache
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Active configuration
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    fn allowed_algorithm(&self, alg: &str) -> VerifyResult<Algorithm> {
        let parsed = Algorithm::from_str(alg).ok().filter(|parsed| {
            !is_symmetric(*parsed) && self.config.allowed_algorithms.contains(parsed)
        });

        parsed.ok_or_else(|| {
            warn!(
                algorithm = %alg,
                allowed = ?self.config.allowed_algorithms,
                "Token algorithm not allowed"
            );
            VerifyError::unsupported_algorithm(alg)
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.config.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // exp and nbf are checked when present but not demanded
        validation.set_required_spec_claims::<&str>(&[]);

        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audiences);
        }

        validation
    }
}
