//! Error types for token verification
//!
//! Two families live here:
//! - [`VerifyError`]: why a presented bearer token was rejected. Every failure
//!   of [`TokenVerifier::verify`](crate::TokenVerifier::verify) is one of these.
//! - [`ConfigError`]: the verifier could not be constructed from its settings.

use thiserror::Error;

/// Result type for verification operations
pub type VerifyResult<T> = std::result::Result<T, VerifyError>;

/// Reason a bearer token failed verification
///
/// Callers facing the network should collapse all variants into a single
/// "unauthorized" response and log [`VerifyError::reason`] plus the display
/// text for operators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum VerifyError {
    /// Token is not three base64url segments with a decodable header carrying a kid
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// No signing key with this kid exists, even after refreshing the key set
    #[error("unknown signing key: {kid}")]
    UnknownKey {
        /// The key id named by the token header
        kid: String,
    },

    /// Header algorithm is outside the allow-list or does not match the key
    #[error("unsupported algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The algorithm named by the token header
        alg: String,
    },

    /// Signature does not verify against the resolved key
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The `exp` claim is in the past (beyond the configured leeway)
    #[error("token expired")]
    TokenExpired,

    /// Signature is valid but `nbf`, `iss` or `aud` failed validation
    #[error("invalid claims: {0}")]
    InvalidClaims(String),

    /// The key set could not be fetched or parsed
    #[error("key source unavailable: {0}")]
    KeySourceUnavailable(String),

    /// The caller cancelled verification or its deadline elapsed
    #[error("verification aborted: {0}")]
    VerificationAborted(String),
}

impl VerifyError {
    /// Create a malformed token error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Create an unknown key error
    pub fn unknown_key(kid: impl Into<String>) -> Self {
        Self::UnknownKey { kid: kid.into() }
    }

    /// Create an unsupported algorithm error
    pub fn unsupported_algorithm(alg: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { alg: alg.into() }
    }

    /// Create a key source error
    pub fn key_source(message: impl Into<String>) -> Self {
        Self::KeySourceUnavailable(message.into())
    }

    /// Stable snake_case tag for structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::UnknownKey { .. } => "unknown_key",
            Self::UnsupportedAlgorithm { .. } => "unsupported_algorithm",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::TokenExpired => "token_expired",
            Self::InvalidClaims(_) => "invalid_claims",
            Self::KeySourceUnavailable(_) => "key_source_unavailable",
            Self::VerificationAborted(_) => "verification_aborted",
        }
    }

    /// Whether retrying the same token later could succeed
    ///
    /// Only an identity provider outage is transient. Every other reason is
    /// terminal for the token that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::KeySourceUnavailable(_))
    }

    /// Map a `jsonwebtoken` decode failure onto the verification taxonomy
    pub(crate) fn from_jwt(err: &jsonwebtoken::errors::Error, alg: &str) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::ImmatureSignature => Self::InvalidClaims("token not yet valid".into()),
            ErrorKind::InvalidIssuer => Self::InvalidClaims("issuer mismatch".into()),
            ErrorKind::InvalidAudience => Self::InvalidClaims("audience mismatch".into()),
            ErrorKind::InvalidSubject => Self::InvalidClaims("subject mismatch".into()),
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::InvalidClaims(format!("missing required claim: {claim}"))
            }
            ErrorKind::InvalidAlgorithm | ErrorKind::MissingAlgorithm => {
                Self::unsupported_algorithm(alg)
            }
            ErrorKind::InvalidSignature => Self::InvalidSignature("signature mismatch".into()),
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => Self::malformed(err.to_string()),
            _ => Self::InvalidSignature(err.to_string()),
        }
    }
}

/// Verifier construction failure
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The JWKS URI could not be parsed
    #[error("invalid JWKS URI '{uri}': {message}")]
    InvalidJwksUri {
        /// The rejected URI
        uri: String,
        /// Parser message
        message: String,
    },

    /// Plain HTTP was requested for a non-loopback host
    #[error("JWKS URI must use https (http is only allowed for loopback hosts): {0}")]
    InsecureJwksUri(String),

    /// The allow-list is empty
    #[error("at least one signing algorithm must be allowed")]
    NoAlgorithms,

    /// The allow-list names a shared-secret algorithm
    #[error("symmetric algorithm {0} cannot be used to verify third-party tokens")]
    SymmetricAlgorithm(String),

    /// The HTTP client for the key set could not be built
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A numeric setting is out of range
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        message: String,
    },
}
