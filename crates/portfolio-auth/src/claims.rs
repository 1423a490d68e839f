//! Typed view of a verified token payload

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Registered claims per RFC 7519 Section 4.1
///
/// Everything the identity provider adds on top (`scope`, `email`,
/// `given_name`, ...) lands in `additional`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Claims {
    /// Issuer (iss)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject (sub) - the signed-in user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    /// Expiration Time (exp) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued At (iat) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// JWT ID (jti)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Provider-specific claims
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// The `aud` claim, which RFC 7519 allows as one string or an array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "client-id"`
    Single(String),
    /// `"aud": ["client-id", "api"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `value` is one of the audiences
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

impl Claims {
    /// Expiry as a `SystemTime`
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.exp.map(|exp| UNIX_EPOCH + Duration::from_secs(exp))
    }

    /// Issue time as a `SystemTime`
    pub fn issued_at(&self) -> Option<SystemTime> {
        self.iat.map(|iat| UNIX_EPOCH + Duration::from_secs(iat))
    }

    /// Look up a non-registered claim
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.additional.get(name)
    }

    /// Space-separated `scope` claim split into individual scopes
    pub fn scopes(&self) -> Vec<&str> {
        self.additional
            .get("scope")
            .and_then(serde_json::Value::as_str)
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}
