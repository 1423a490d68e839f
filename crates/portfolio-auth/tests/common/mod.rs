//! Common test utilities for integration tests
//!
//! Provides RSA signing keys with matching JWKs, a wiremock identity provider
//! and an in-memory key set source that counts fetches.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use parking_lot::Mutex;
use portfolio_auth::{KeySetSource, VerifyError, VerifyResult};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// RSA key pair usable for RS256 signing, with its public JWK parameters
pub struct TestRsaKey {
    pub private_pem: Vec<u8>,
    pub n: String,
    pub e: String,
}

impl TestRsaKey {
    fn generate() -> Self {
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("Failed to encode private key")
            .as_bytes()
            .to_vec();

        Self {
            private_pem,
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    }

    /// Public JWK for this key under `kid`
    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": self.n,
            "e": self.e,
        })
    }

    /// Sign `claims` with RS256 and put `kid` in the header
    pub fn sign(&self, kid: &str, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(&self.private_pem).expect("Invalid RSA key");
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        header.typ = Some("JWT".to_string());
        encode(&header, claims, &key).expect("Failed to encode test JWT")
    }
}

/// Primary signing key, generated once per test binary
pub fn primary_key() -> &'static TestRsaKey {
    static KEY: OnceLock<TestRsaKey> = OnceLock::new();
    KEY.get_or_init(TestRsaKey::generate)
}

/// A second, unrelated key (rotation and substitution scenarios)
pub fn secondary_key() -> &'static TestRsaKey {
    static KEY: OnceLock<TestRsaKey> = OnceLock::new();
    KEY.get_or_init(TestRsaKey::generate)
}

/// Get current Unix timestamp
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Claims expiring `exp_offset_secs` from now
pub fn claims_expiring_in(exp_offset_secs: i64) -> Value {
    let now = current_timestamp();
    json!({
        "sub": "user-42",
        "iss": "https://idp.example.com/oauth2/token",
        "aud": "portfolio-spa",
        "exp": (now as i64 + exp_offset_secs) as u64,
        "iat": now,
        "email": "visitor@example.com",
    })
}

/// Build an unsigned-looking token from raw header and payload JSON
pub fn raw_token(header: &Value, payload: &Value, signature: &str) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        signature
    )
}

/// Identity provider serving a JWKS document
pub struct MockIdentityProvider {
    pub server: MockServer,
    pub jwks_uri: String,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_uri = format!("{}/oauth2/jwks", server.uri());
        Self { server, jwks_uri }
    }

    /// Serve `keys` and expect exactly `calls` requests
    pub async fn mock_jwks(&self, keys: Vec<Value>, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer every JWKS request with `status`
    pub async fn mock_jwks_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(status).set_body_string("upstream says no"))
            .mount(&self.server)
            .await;
    }

    /// Answer every JWKS request with a 200 that is not a key set
    pub async fn mock_jwks_garbage(&self) {
        Mock::given(method("GET"))
            .and(path("/oauth2/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&self.server)
            .await;
    }
}

/// In-memory key set source with a fetch counter and a failure switch
#[derive(Debug)]
pub struct CountingSource {
    keys: Mutex<JwkSet>,
    fetches: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl CountingSource {
    pub fn new(keys: Vec<Value>) -> Arc<Self> {
        Self::with_delay(keys, Duration::ZERO)
    }

    pub fn with_delay(keys: Vec<Value>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(jwk_set(keys)),
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn publish(&self, keys: Vec<Value>) {
        *self.keys.lock() = jwk_set(keys);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeySetSource for CountingSource {
    async fn fetch(&self) -> VerifyResult<JwkSet> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(VerifyError::key_source("provider down"));
        }
        Ok(self.keys.lock().clone())
    }

    fn location(&self) -> &str {
        "memory://test"
    }
}

pub fn jwk_set(keys: Vec<Value>) -> JwkSet {
    serde_json::from_value(json!({ "keys": keys })).expect("Invalid JWK set")
}
