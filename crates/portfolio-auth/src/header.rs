//! Unverified token inspection
//!
//! Nothing in here trusts the token. It only splits the compact form and reads
//! the header so the verifier knows which key and algorithm to try.

use base64::{
    Engine as _,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use serde::Deserialize;

use crate::error::{VerifyError, VerifyResult};

/// The three segments of a compact JWS
#[derive(Debug, Clone, Copy)]
pub struct TokenParts<'a> {
    /// Base64url header
    pub header: &'a str,
    /// Base64url payload
    pub payload: &'a str,
    /// Base64url signature
    pub signature: &'a str,
}

/// Decoded JOSE header
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signing algorithm as written by the issuer
    pub alg: String,
    /// Key id
    #[serde(default)]
    pub kid: Option<String>,
    /// Media type, usually `JWT`
    #[serde(default)]
    pub typ: Option<String>,
}

/// Split a token into exactly three non-empty segments
pub fn split_token(token: &str) -> VerifyResult<TokenParts<'_>> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerifyError::malformed(format!(
            "expected 3 segments, found {}",
            token.split('.').count()
        )));
    };

    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(VerifyError::malformed("empty token segment"));
    }

    Ok(TokenParts {
        header,
        payload,
        signature,
    })
}

/// Decode the header segment and require a key id
pub fn decode_header(parts: &TokenParts<'_>) -> VerifyResult<(TokenHeader, String)> {
    let bytes = decode_segment(parts.header)
        .map_err(|e| VerifyError::malformed(format!("header is not base64url: {e}")))?;

    let header: TokenHeader = serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::malformed(format!("header is not valid JSON: {e}")))?;

    let kid = match header.kid.as_deref() {
        Some(kid) if !kid.is_empty() => kid.to_string(),
        _ => return Err(VerifyError::malformed("token header missing kid")),
    };

    Ok((header, kid))
}

/// Base64url decode, tolerating issuers that keep `=` padding
fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if segment.ends_with('=') {
        URL_SAFE.decode(segment)
    } else {
        URL_SAFE_NO_PAD.decode(segment)
    }
}
