//! HTTP application wiring
//!
//! `/mcp` sits behind the transport guard and the authentication cascade.
//! The OAuth endpoints, discovery documents and `/health` stay public.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use courtlistener_auth::guard::TransportGuard;
use courtlistener_auth::http::{OAuthState, oauth_router};
use courtlistener_auth::metadata::{PROTECTED_RESOURCE_METADATA_PATH, ProtectedResourceMetadata};
use courtlistener_auth::storage::InMemoryGrantStore;
use courtlistener_auth::tower::AuthLayer;
use courtlistener_auth::{
    AuthConfig, AuthDispatcher, AuthIdentity, AuthResult, AuthorizationServer, ClientRegistry,
};
use serde_json::{Value, json};
use tracing::info;

/// Path of the protected MCP endpoint
pub const MCP_PATH: &str = "/mcp";

/// Assembled application
pub struct App {
    /// Router serving every endpoint
    pub router: Router,
    /// Grant store backing the authorization server
    pub grants: Arc<InMemoryGrantStore>,
}

/// Build the application from configuration
///
/// # Errors
///
/// Fails when the HTTP client behind the verifiers cannot be built.
pub fn build(mut config: AuthConfig) -> AuthResult<App> {
    let issuer = config
        .authorization_server
        .issuer_url
        .trim_end_matches('/')
        .to_string();
    if config.resource_metadata_url.is_none() {
        config.resource_metadata_url = Some(format!("{issuer}{PROTECTED_RESOURCE_METADATA_PATH}"));
    }

    let grants = Arc::new(InMemoryGrantStore::new());
    let server = AuthorizationServer::new(config.authorization_server.clone(), grants.clone());

    let dispatcher = AuthDispatcher::from_config(&config)?.with_authorization_server(server.clone());
    let auth_layer = AuthLayer::new(dispatcher, TransportGuard::new(&config.guard));

    let resource = ProtectedResourceMetadata::new(format!("{issuer}{MCP_PATH}"), vec![issuer])
        .with_scopes(config.authorization_server.supported_scopes.clone())
        .with_name("CourtListener MCP");
    let oauth = oauth_router(
        OAuthState::new(Arc::new(ClientRegistry::new()), server).with_protected_resource(resource),
    );

    let router = Router::new()
        .route(MCP_PATH, post(mcp))
        .route_layer(auth_layer)
        .route("/health", get(health))
        .merge(oauth);

    info!(
        oidc = config.oidc.is_some(),
        cloudflare_access = config.cloudflare_access.is_some(),
        service_keys = config.service_keys.is_some(),
        static_token = config.static_token.is_some(),
        "Application assembled"
    );

    Ok(App { router, grants })
}

// Reports who the request authenticated as. Open mode carries no identity.
async fn mcp(identity: Option<Extension<AuthIdentity>>) -> Json<Value> {
    match identity {
        Some(Extension(identity)) => Json(json!({
            "authenticated": true,
            "scheme": identity.scheme,
            "subject": identity.subject,
            "client_id": identity.client_id,
            "scopes": identity.scopes,
        })),
        None => Json(json!({ "authenticated": false })),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn config(vars: &[(&str, &str)]) -> AuthConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AuthConfig::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_mcp(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(MCP_PATH);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = build(config(&[("MCP_AUTH_TOKEN", "s3cret")])).unwrap();
        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_static_token_protects_mcp() {
        let app = build(config(&[("MCP_AUTH_TOKEN", "s3cret")])).unwrap();

        let denied = app.router.clone().oneshot(post_mcp(None)).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        let challenge = denied.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert!(challenge.contains("resource_metadata="));

        let allowed = app.router.oneshot(post_mcp(Some("s3cret"))).await.unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        let body = body_json(allowed).await;
        assert_eq!(body["authenticated"], true);
        assert_eq!(body["scheme"], "static-token");
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let app = build(config(&[("MCP_AUTH_TOKEN", "s3cret")])).unwrap();
        let response = app
            .router
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_self_issued_token_cannot_replace_static_token() {
        let app = build(config(&[("MCP_AUTH_TOKEN", "s3cret")])).unwrap();

        let registered = app
            .router
            .clone()
            .oneshot(
                Request::post("/register")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({
                            "client_name": "stranger",
                            "redirect_uris": ["http://127.0.0.1:9999/cb"],
                            "token_endpoint_auth_method": "none",
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(registered.status(), StatusCode::CREATED);
        let client_id = body_json(registered).await["client_id"]
            .as_str()
            .unwrap()
            .to_string();

        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let authorize = format!(
            "/authorize?response_type=code&client_id={client_id}&code_challenge={}&code_challenge_method=S256",
            courtlistener_auth::pkce::s256_challenge(verifier)
        );
        let redirected = app
            .router
            .clone()
            .oneshot(Request::get(authorize).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(redirected.status(), StatusCode::FOUND);
        let location = redirected.headers()[header::LOCATION].to_str().unwrap();
        let code = location
            .split(['?', '&'])
            .find_map(|pair| pair.strip_prefix("code="))
            .unwrap()
            .to_string();

        let issued = app
            .router
            .clone()
            .oneshot(
                Request::post("/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(format!(
                        "grant_type=authorization_code&code={code}&code_verifier={verifier}&client_id={client_id}"
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(issued.status(), StatusCode::OK);
        let access_token = body_json(issued).await["access_token"]
            .as_str()
            .unwrap()
            .to_string();

        let denied = app.router.oneshot(post_mcp(Some(&access_token))).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(denied.headers()["x-mcp-auth-scheme"], "static-token");
    }

    #[tokio::test]
    async fn test_open_mode_has_no_identity() {
        let app = build(config(&[])).unwrap();
        let response = app.router.oneshot(post_mcp(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["authenticated"], false);
    }

    #[tokio::test]
    async fn test_protected_resource_metadata_names_mcp() {
        let app = build(config(&[("OAUTH_ISSUER_URL", "https://mcp.example.com")])).unwrap();
        let response = app
            .router
            .oneshot(
                Request::get(PROTECTED_RESOURCE_METADATA_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["resource"], "https://mcp.example.com/mcp");
        assert_eq!(body["authorization_servers"][0], "https://mcp.example.com");
    }
}
