//! Common test utilities for server integration tests

#![allow(dead_code)]

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{Router, body::Body, body::to_bytes, http::Request, response::Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use portfolio_server::{AppState, ServerConfig};
use serde_json::{Value, json};
use tower::ServiceExt; // for `oneshot`
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const DISCOVERY_PATH: &str = "/oauth2/oidcdiscovery/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/oauth2/jwks";

/// RS256 signing key with its public JWK parameters
pub struct TestRsaKey {
    private_pem: Vec<u8>,
    n: String,
    e: String,
}

impl TestRsaKey {
    fn generate() -> Self {
        use rsa::RsaPrivateKey;
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};
        use rsa::traits::PublicKeyParts;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("Failed to generate RSA key");

        Self {
            private_pem: private_key
                .to_pkcs8_pem(LineEnding::LF)
                .expect("Failed to encode private key")
                .as_bytes()
                .to_vec(),
            n: URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be()),
        }
    }

    pub fn jwk(&self, kid: &str) -> Value {
        json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": self.n, "e": self.e})
    }

    pub fn sign(&self, kid: &str, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(&self.private_pem).expect("Invalid RSA key");
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &key).expect("Failed to encode test JWT")
    }
}

pub fn signing_key() -> &'static TestRsaKey {
    static KEY: OnceLock<TestRsaKey> = OnceLock::new();
    KEY.get_or_init(TestRsaKey::generate)
}

pub fn claims_expiring_in(exp_offset_secs: i64) -> Value {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs();
    json!({
        "sub": "visitor-7",
        "iss": "https://idp.example.com/oauth2/token",
        "aud": "portfolio-spa",
        "exp": (now as i64 + exp_offset_secs) as u64,
        "iat": now,
        "email": "visitor@example.com",
    })
}

/// Mock identity provider; its URI is the issuer domain
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn domain(&self) -> String {
        self.server.uri()
    }

    pub async fn respond(&self, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub async fn publish_keys(&self, keys: Vec<Value>) {
        self.respond(
            JWKS_PATH,
            ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })),
        )
        .await;
    }

    /// Server configuration pointing at this provider
    pub fn config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.domain());
        config.verifier = config
            .verifier
            .with_min_refresh_interval(Duration::ZERO)
            .with_fetch_retries(0);
        config.upstream_timeout = Duration::from_secs(5);
        config
    }
}

/// Application router against `config`, with CORS and tracing layers
pub fn app(config: &ServerConfig) -> Router {
    let state = AppState::from_config(config).expect("valid config");
    portfolio_server::app(config, state).expect("valid CORS origins")
}

pub async fn get(app: Router, uri: &str, authorization: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(value) = authorization {
        request = request.header("Authorization", value);
    }
    app.oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn json_body(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}
