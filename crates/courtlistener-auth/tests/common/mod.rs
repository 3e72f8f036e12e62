//! Common test utilities for integration tests
//!
//! Token minting with a shared HS256 key, a wiremock identity provider, and
//! an in-process fetcher for URLs wiremock cannot serve (Cloudflare Access
//! certs live under a fixed `https://` path).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use courtlistener_auth::error::AuthResult;
use courtlistener_auth::oidc::{
    FetchedJson, HttpFetcher, JsonWebTokenVerifier, KeyCache, OidcVerifier,
};
use courtlistener_auth::request::RequestContext;

/// Seconds since the epoch
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A symmetric signing key published as an `oct` JWK
#[derive(Debug, Clone)]
pub struct TestKey {
    pub kid: String,
    secret: Vec<u8>,
}

impl TestKey {
    pub fn new(kid: &str) -> Self {
        Self {
            kid: kid.to_string(),
            secret: format!("integration-test-secret-for-{kid}-0123456789").into_bytes(),
        }
    }

    /// Key with an explicit secret, for forging signatures under a known kid
    pub fn with_secret(kid: &str, secret: &[u8]) -> Self {
        Self {
            kid: kid.to_string(),
            secret: secret.to_vec(),
        }
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "oct",
            "kid": self.kid,
            "alg": "HS256",
            "use": "sig",
            "k": URL_SAFE_NO_PAD.encode(&self.secret),
        })
    }

    /// Sign `claims` with this key
    pub fn mint(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &EncodingKey::from_secret(&self.secret)).unwrap()
    }
}

/// JWKS document for a list of keys
pub fn jwk_set(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Standard claims for `issuer`, valid for an hour
pub fn claims(issuer: &str, audience: &str, scope: &str) -> Value {
    json!({
        "iss": issuer,
        "aud": audience,
        "sub": "user-123",
        "client_id": "mcp-client",
        "scope": scope,
        "iat": now(),
        "exp": now() + 3600,
    })
}

/// OIDC verifier that accepts the HS256 test keys
pub fn hs256_verifier(fetcher: Arc<dyn HttpFetcher>) -> OidcVerifier {
    OidcVerifier::with_key_cache(KeyCache::new(fetcher)).with_jwt_verifier(Arc::new(
        JsonWebTokenVerifier::new().with_algorithms(vec![Algorithm::HS256]),
    ))
}

/// Wiremock identity provider serving discovery and JWKS
pub struct MockIdentityProvider {
    pub server: MockServer,
}

impl MockIdentityProvider {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn issuer(&self) -> String {
        self.server.uri()
    }

    pub fn jwks_url(&self) -> String {
        format!("{}/jwks", self.server.uri())
    }

    /// Serve the discovery document, expecting `times` fetches
    pub async fn mock_discovery(&self, times: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer(),
                "jwks_uri": self.jwks_url(),
            })))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` at the JWKS endpoint
    pub async fn mock_jwks(&self, keys: &[&TestKey]) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwk_set(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the next `n` JWKS fetches only
    pub async fn mock_jwks_times(&self, keys: &[&TestKey], n: u64) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwk_set(keys)))
            .up_to_n_times(n)
            .mount(&self.server)
            .await;
    }
}

/// In-process fetcher answering from a URL map; unknown URLs get 404
#[derive(Debug, Default)]
pub struct FixtureFetcher {
    documents: Mutex<HashMap<String, Value>>,
    hits: AtomicUsize,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, url: &str, body: Value) -> Self {
        self.documents
            .lock()
            .unwrap()
            .insert(url.to_string(), body);
        self
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetcher for FixtureFetcher {
    async fn get_json(&self, url: &str) -> AuthResult<FetchedJson> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let body = self.documents.lock().unwrap().get(url).cloned();
        Ok(match body {
            Some(body) => FetchedJson { status: 200, body },
            None => FetchedJson {
                status: 404,
                body: Value::Null,
            },
        })
    }
}

/// Request context for `POST /mcp` with the given headers
pub fn request(headers: &[(&str, &str)]) -> RequestContext {
    let mut builder = http::Request::post("/mcp");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let (parts, _) = builder.body(()).unwrap().into_parts();
    RequestContext::from_parts(&parts)
}

/// `Authorization: Bearer` header pair
pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}
