//! Authentication cascade scenarios
//!
//! Each test configures a combination of schemes and checks which one
//! accepts (or refuses) a request, and what the refusal looks like.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

use async_trait::async_trait;
use common::{FixtureFetcher, TestKey, bearer, claims, hs256_verifier, jwk_set, request};
use courtlistener_auth::config::{
    AuthorizationServerSettings, CloudflareAccessSettings, OidcSettings, ServiceKeySettings,
};
use courtlistener_auth::dispatcher::AUTH_SCHEME_HEADER;
use courtlistener_auth::oidc::ReqwestFetcher;
use courtlistener_auth::error::AuthResult;
use courtlistener_auth::service_keys::{
    ServiceKeyIdentity, ServiceKeyStore, SupabaseKeyStore, hash_key,
};
use courtlistener_auth::{
    AuthConfig, AuthDispatcher, AuthScheme, AuthorizationParams, AuthorizationServer,
    ClientMetadata, ClientRegistry, Denial, Verdict,
};

const OIDC_ISSUER: &str = "https://idp.example.com";
const OIDC_AUDIENCE: &str = "https://mcp.example.com";
const CF_TEAM: &str = "acme.cloudflareaccess.com";
const CF_AUD: &str = "cf-app-aud-tag";
const STATIC_TOKEN: &str = "legacy-static-token";

struct Fixture {
    oidc_key: TestKey,
    cf_key: TestKey,
    fetcher: Arc<FixtureFetcher>,
}

impl Fixture {
    fn new() -> Self {
        let oidc_key = TestKey::new("oidc-1");
        let cf_key = TestKey::new("cf-1");
        let cf = CloudflareAccessSettings::new(CF_TEAM, CF_AUD);
        let fetcher = FixtureFetcher::new()
            .with(
                &format!("{OIDC_ISSUER}/.well-known/openid-configuration"),
                json!({ "issuer": OIDC_ISSUER, "jwks_uri": format!("{OIDC_ISSUER}/jwks") }),
            )
            .with(&format!("{OIDC_ISSUER}/jwks"), jwk_set(&[&oidc_key]))
            .with(&cf.jwks_url(), jwk_set(&[&cf_key]));
        Self {
            oidc_key,
            cf_key,
            fetcher: Arc::new(fetcher),
        }
    }

    fn dispatcher(&self, config: &AuthConfig) -> AuthDispatcher {
        AuthDispatcher::with_collaborators(config, Arc::new(hs256_verifier(self.fetcher.clone())), None)
    }

    fn oidc_token(&self, scope: &str) -> String {
        self.oidc_key.mint(&claims(OIDC_ISSUER, OIDC_AUDIENCE, scope))
    }

    fn cf_assertion(&self) -> String {
        let mut assertion = claims(&format!("https://{CF_TEAM}"), CF_AUD, "");
        assertion["email"] = json!("clerk@example.com");
        self.cf_key.mint(&assertion)
    }
}

fn oidc() -> OidcSettings {
    OidcSettings::new(OIDC_ISSUER).with_audience(OIDC_AUDIENCE)
}

fn full_config(allow_static_fallback: bool) -> AuthConfig {
    AuthConfig {
        oidc: Some(oidc()),
        cloudflare_access: Some(CloudflareAccessSettings::new(CF_TEAM, CF_AUD)),
        static_token: Some(SecretString::new(STATIC_TOKEN.to_string())),
        allow_static_fallback,
        ..AuthConfig::default()
    }
}

fn allowed_scheme(verdict: Verdict) -> AuthScheme {
    match verdict {
        Verdict::Allow(Some(identity)) => identity.scheme,
        other => panic!("expected an authenticated identity, got {other:?}"),
    }
}

fn denial(verdict: Verdict) -> Denial {
    match verdict {
        Verdict::Deny(denial) => denial,
        other => panic!("expected a denial, got {other:?}"),
    }
}

#[tokio::test]
async fn test_oidc_bearer_accepted() {
    let fixture = Fixture::new();
    let dispatcher = fixture.dispatcher(&full_config(false));
    let (name, value) = bearer(&fixture.oidc_token("legal:read"));

    match dispatcher.authorize(&request(&[(name, value.as_str())])).await {
        Verdict::Allow(Some(identity)) => {
            assert_eq!(identity.scheme, AuthScheme::Oidc);
            assert_eq!(identity.subject.as_deref(), Some("user-123"));
            assert!(identity.has_scope("legal:read"));
            assert_eq!(
                identity.claims.unwrap().get("iss"),
                Some(&Value::from(OIDC_ISSUER))
            );
        }
        other => panic!("unexpected verdict: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_oidc_rescued_by_cloudflare_assertion() {
    let fixture = Fixture::new();
    let dispatcher = fixture.dispatcher(&full_config(false));
    let assertion = fixture.cf_assertion();

    let verdict = dispatcher
        .authorize(&request(&[
            ("Authorization", "Bearer not-a-jwt"),
            ("Cf-Access-Jwt-Assertion", assertion.as_str()),
        ]))
        .await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::CloudflareAccess);
}

#[tokio::test]
async fn test_missing_bearer_rescued_by_cloudflare_assertion() {
    let fixture = Fixture::new();
    let dispatcher = fixture.dispatcher(&full_config(false));
    let assertion = fixture.cf_assertion();

    let verdict = dispatcher
        .authorize(&request(&[("Cf-Access-Jwt-Assertion", assertion.as_str())]))
        .await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::CloudflareAccess);
}

#[tokio::test]
async fn test_static_fallback_only_with_flag() {
    let fixture = Fixture::new();
    let (name, value) = bearer(STATIC_TOKEN);

    let strict = fixture.dispatcher(&full_config(false));
    let refused = denial(strict.authorize(&request(&[(name, value.as_str())])).await);
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refused.scheme, Some(AuthScheme::Oidc));

    let lenient = fixture.dispatcher(&full_config(true));
    let verdict = lenient.authorize(&request(&[(name, value.as_str())])).await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::StaticToken);
}

#[tokio::test]
async fn test_insufficient_scope_is_not_rescued() {
    let fixture = Fixture::new();
    let mut config = full_config(true);
    config.oidc = Some(oidc().with_required_scope("legal:read"));
    let dispatcher = fixture.dispatcher(&config);

    let token = fixture.oidc_token("legal:search");
    let assertion = fixture.cf_assertion();
    let (name, value) = bearer(&token);
    let refused = denial(
        dispatcher
            .authorize(&request(&[(name, value.as_str()), ("Cf-Access-Jwt-Assertion", assertion.as_str())]))
            .await,
    );

    assert_eq!(refused.status, StatusCode::FORBIDDEN);
    assert_eq!(refused.reason, "insufficient_scope");
    let challenge = refused.www_authenticate.unwrap();
    assert!(challenge.contains("error=\"insufficient_scope\""));
    assert!(challenge.contains("scope=\"legal:read\""));
}

#[tokio::test]
async fn test_cloudflare_only() {
    let fixture = Fixture::new();
    let config = AuthConfig {
        cloudflare_access: Some(CloudflareAccessSettings::new(CF_TEAM, CF_AUD)),
        ..AuthConfig::default()
    };
    let dispatcher = fixture.dispatcher(&config);

    let assertion = fixture.cf_assertion();
    let verdict = dispatcher
        .authorize(&request(&[("Cf-Access-Jwt-Assertion", assertion.as_str())]))
        .await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::CloudflareAccess);

    let refused = denial(dispatcher.authorize(&request(&[])).await);
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refused.scheme, Some(AuthScheme::CloudflareAccess));

    // An OIDC token is not an Access assertion
    let forged = fixture.oidc_token("legal:read");
    let refused = denial(
        dispatcher
            .authorize(&request(&[("Cf-Access-Jwt-Assertion", forged.as_str())]))
            .await,
    );
    assert_eq!(refused.reason, "invalid_token");
}

#[tokio::test]
async fn test_denial_points_at_resource_metadata() {
    let fixture = Fixture::new();
    let mut config = full_config(false);
    config.resource_metadata_url =
        Some("https://mcp.example.com/.well-known/oauth-protected-resource".to_string());
    let dispatcher = fixture.dispatcher(&config);

    let refused = denial(dispatcher.authorize(&request(&[])).await);
    let response: http::Response<String> = refused.into_http_response();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[AUTH_SCHEME_HEADER], "oidc");
    let challenge = response.headers()[http::header::WWW_AUTHENTICATE]
        .to_str()
        .unwrap();
    assert!(challenge.contains(
        "resource_metadata=\"https://mcp.example.com/.well-known/oauth-protected-resource\""
    ));
}

#[tokio::test]
async fn test_verification_deadline() {
    let slow_idp = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(3))
                .set_body_json(json!({ "jwks_uri": format!("{}/jwks", slow_idp.uri()) })),
        )
        .mount(&slow_idp)
        .await;

    let config = AuthConfig {
        oidc: Some(OidcSettings::new(slow_idp.uri())),
        verification_timeout: Duration::from_millis(200),
        ..AuthConfig::default()
    };
    let dispatcher = AuthDispatcher::with_collaborators(
        &config,
        Arc::new(hs256_verifier(Arc::new(ReqwestFetcher::new().unwrap()))),
        None,
    );

    let token = TestKey::new("k1").mint(&claims(&slow_idp.uri(), OIDC_AUDIENCE, "legal:read"));
    let (name, value) = bearer(&token);

    let started = Instant::now();
    let refused = denial(dispatcher.authorize(&request(&[(name, value.as_str())])).await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    assert_eq!(refused.description, "The access token is invalid or expired");
}

async fn supabase() -> (MockServer, AuthConfig) {
    let server = MockServer::start().await;
    let config = AuthConfig {
        service_keys: Some(ServiceKeySettings {
            url: server.uri(),
            service_role_key: SecretString::new("service-role".to_string()),
            table: "api_keys".to_string(),
        }),
        static_token: Some(SecretString::new(STATIC_TOKEN.to_string())),
        ..AuthConfig::default()
    };
    (server, config)
}

fn supabase_dispatcher(config: &AuthConfig) -> AuthDispatcher {
    let store = SupabaseKeyStore::new(config.service_keys.clone().unwrap()).unwrap();
    AuthDispatcher::with_collaborators(
        config,
        Arc::new(hs256_verifier(Arc::new(FixtureFetcher::new()))),
        Some(Arc::new(store) as Arc<dyn ServiceKeyStore>),
    )
}

#[tokio::test]
async fn test_service_key_lookup() {
    let (server, config) = supabase().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .and(query_param("key_hash", format!("eq.{}", hash_key("svc-live-key"))))
        .and(query_param("revoked", "is.false"))
        .and(header("apikey", "service-role"))
        .and(header("authorization", "Bearer service-role"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 7, "user_id": "user-9", "scopes": "legal:read legal:search" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dispatcher = supabase_dispatcher(&config);

    let (name, value) = bearer("svc-live-key");
    match dispatcher.authorize(&request(&[(name, value.as_str())])).await {
        Verdict::Allow(Some(identity)) => {
            assert_eq!(identity.scheme, AuthScheme::ServiceKey);
            assert_eq!(identity.client_id.as_deref(), Some("7"));
            assert_eq!(identity.subject.as_deref(), Some("user-9"));
            assert_eq!(identity.scopes, vec!["legal:read", "legal:search"]);
        }
        other => panic!("unexpected verdict: {other:?}"),
    }

    let (name, value) = bearer("svc-revoked-key");
    let refused = denial(dispatcher.authorize(&request(&[(name, value.as_str())])).await);
    assert_eq!(refused.scheme, Some(AuthScheme::ServiceKey));
}

#[tokio::test]
async fn test_service_key_store_failure_hides_detail() {
    let (server, mut config) = supabase().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/api_keys"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "message": "relation \"api_keys\" does not exist" })),
        )
        .mount(&server)
        .await;

    let (name, value) = bearer(STATIC_TOKEN);

    let refused = denial(
        supabase_dispatcher(&config)
            .authorize(&request(&[(name, value.as_str())]))
            .await,
    );
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
    assert!(!refused.description.contains("relation"));

    config.allow_static_fallback = true;
    let verdict = supabase_dispatcher(&config)
        .authorize(&request(&[(name, value.as_str())]))
        .await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::StaticToken);
}

#[derive(Debug)]
struct NoKeys;

#[async_trait]
impl ServiceKeyStore for NoKeys {
    async fn lookup(&self, _key: &str) -> AuthResult<Option<ServiceKeyIdentity>> {
        Ok(None)
    }
}

/// Authorization server plus an access token it issued to a self-registered client
async fn self_issued_token() -> (AuthorizationServer, String, String) {
    let registry = ClientRegistry::new();
    let server = AuthorizationServer::in_memory(AuthorizationServerSettings::default());
    let client = registry
        .register_client(
            ClientMetadata::mcp_client("Anyone", "http://127.0.0.1:9000/cb").public(),
        )
        .unwrap();
    let code = server
        .authorize(&client, AuthorizationParams::new("challenge-value"))
        .await
        .unwrap()
        .code;
    let tokens = server
        .exchange_authorization_code(&client, &code, None)
        .await
        .unwrap();
    (server, tokens.access_token, client.client_id)
}

#[tokio::test]
async fn test_configured_scheme_refuses_other_credentials() {
    let fixture = Fixture::new();
    let (server, issued, _) = self_issued_token().await;
    // Right issuer and audience, signed by a key the issuer never published
    let stranger_jwt =
        TestKey::new("stranger").mint(&claims(OIDC_ISSUER, OIDC_AUDIENCE, "legal:read"));

    let schemes = [
        (
            AuthScheme::StaticToken,
            AuthConfig {
                static_token: Some(SecretString::new(STATIC_TOKEN.to_string())),
                ..AuthConfig::default()
            },
        ),
        (
            AuthScheme::ServiceKey,
            AuthConfig {
                service_keys: Some(ServiceKeySettings {
                    url: "https://proj.supabase.co".to_string(),
                    service_role_key: SecretString::new("service-role".to_string()),
                    table: "api_keys".to_string(),
                }),
                ..AuthConfig::default()
            },
        ),
        (
            AuthScheme::Oidc,
            AuthConfig {
                oidc: Some(oidc()),
                ..AuthConfig::default()
            },
        ),
    ];

    for (scheme, config) in schemes {
        let dispatcher = AuthDispatcher::with_collaborators(
            &config,
            Arc::new(hs256_verifier(fixture.fetcher.clone())),
            Some(Arc::new(NoKeys) as Arc<dyn ServiceKeyStore>),
        )
        .with_authorization_server(server.clone());
        assert!(!dispatcher.is_open());

        for credential in [issued.as_str(), stranger_jwt.as_str(), "well-formed-opaque-token"] {
            let (name, value) = bearer(credential);
            let refused = denial(dispatcher.authorize(&request(&[(name, value.as_str())])).await);
            assert_eq!(refused.status, StatusCode::UNAUTHORIZED, "{scheme} accepted a foreign credential");
            assert_eq!(refused.reason, "invalid_token");
            assert_eq!(refused.scheme, Some(scheme));
        }
    }
}

#[tokio::test]
async fn test_open_mode() {
    let dispatcher = Fixture::new().dispatcher(&AuthConfig::default());
    assert!(dispatcher.is_open());
    assert_eq!(dispatcher.authorize(&request(&[])).await, Verdict::Allow(None));
}

#[tokio::test]
async fn test_open_mode_resolves_issued_tokens() {
    let (server, issued, client_id) = self_issued_token().await;
    let dispatcher = Fixture::new()
        .dispatcher(&AuthConfig::default())
        .with_authorization_server(server);

    let (name, value) = bearer(&issued);
    match dispatcher.authorize(&request(&[(name, value.as_str())])).await {
        Verdict::Allow(Some(identity)) => {
            assert_eq!(identity.scheme, AuthScheme::AuthorizationServer);
            assert_eq!(identity.client_id.as_deref(), Some(client_id.as_str()));
            assert_eq!(identity.scopes.len(), 3);
        }
        other => panic!("unexpected verdict: {other:?}"),
    }

    // Unknown tokens are still let through anonymously
    assert_eq!(
        dispatcher
            .authorize(&request(&[("Authorization", "Bearer opaque-but-unknown")]))
            .await,
        Verdict::Allow(None)
    );
}

#[tokio::test]
async fn test_issuer_with_trailing_slash() {
    const ISSUER: &str = "https://tenant.auth0.example/";
    let key = TestKey::new("auth0-1");
    let fetcher = FixtureFetcher::new()
        .with(
            "https://tenant.auth0.example/.well-known/openid-configuration",
            json!({ "issuer": ISSUER, "jwks_uri": "https://tenant.auth0.example/.well-known/jwks.json" }),
        )
        .with(
            "https://tenant.auth0.example/.well-known/jwks.json",
            jwk_set(&[&key]),
        );

    let config = AuthConfig::from_lookup(|name| match name {
        "OIDC_ISSUER_URL" => Some(ISSUER.to_string()),
        "OIDC_AUDIENCE" => Some(OIDC_AUDIENCE.to_string()),
        _ => None,
    })
    .unwrap();
    let dispatcher = AuthDispatcher::with_collaborators(
        &config,
        Arc::new(hs256_verifier(Arc::new(fetcher))),
        None,
    );

    let token = key.mint(&claims(ISSUER, OIDC_AUDIENCE, "legal:read"));
    let (name, value) = bearer(&token);
    let verdict = dispatcher.authorize(&request(&[(name, value.as_str())])).await;
    assert_eq!(allowed_scheme(verdict), AuthScheme::Oidc);

    // The slash-less form is a different issuer
    let token = key.mint(&claims("https://tenant.auth0.example", OIDC_AUDIENCE, "legal:read"));
    let (name, value) = bearer(&token);
    let refused = denial(dispatcher.authorize(&request(&[(name, value.as_str())])).await);
    assert_eq!(refused.status, StatusCode::UNAUTHORIZED);
}
