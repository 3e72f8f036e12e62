//! OAuth HTTP endpoints
//!
//! [`oauth_router`] serves the authorization server over axum:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /authorize` | Authorization code + PKCE (302 to the client) |
//! | `POST /token` | `authorization_code` and `refresh_token` grants |
//! | `POST /register` | Dynamic client registration (RFC 7591) |
//! | `POST /revoke` | Token revocation (RFC 7009) |
//! | `GET /.well-known/oauth-authorization-server` | RFC 8414 metadata |
//! | `GET /.well-known/oauth-protected-resource` | RFC 9728 metadata |
//!
//! Errors are JSON `{"error", "error_description"}` bodies. `/authorize`
//! only redirects errors back to the client once the client and its
//! redirect URI have been verified; before that it answers 400 itself.

use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{Query, State, rejection::FormRejection, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};
use url::Url;

use crate::authorization_server::{AuthorizationParams, AuthorizationServer};
use crate::challenge::REALM;
use crate::error::{AuthError, AuthResult};
use crate::metadata::{
    AUTHORIZATION_SERVER_METADATA_PATH, AuthorizationServerMetadata,
    PROTECTED_RESOURCE_METADATA_PATH, ProtectedResourceMetadata,
};
use crate::pkce::{CodeChallengeMethod, verify_code_verifier};
use crate::registry::{ClientMetadata, ClientRegistry, RegisteredClient};
use crate::scope::parse_scope;

/// Shared state behind the OAuth routes
#[derive(Debug, Clone)]
pub struct OAuthState {
    registry: Arc<ClientRegistry>,
    server: AuthorizationServer,
    resource: Option<Arc<ProtectedResourceMetadata>>,
}

impl OAuthState {
    /// State over a client registry and an authorization server
    pub fn new(registry: Arc<ClientRegistry>, server: AuthorizationServer) -> Self {
        Self {
            registry,
            server,
            resource: None,
        }
    }

    /// Serve `metadata` at the protected resource metadata path
    #[must_use]
    pub fn with_protected_resource(mut self, metadata: ProtectedResourceMetadata) -> Self {
        self.resource = Some(Arc::new(metadata));
        self
    }

    /// The client registry
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// The authorization server
    pub fn server(&self) -> &AuthorizationServer {
        &self.server
    }
}

/// Build the OAuth router
pub fn oauth_router(state: OAuthState) -> Router {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/token", post(token))
        .route("/register", post(register))
        .route("/revoke", post(revoke))
        .route(
            AUTHORIZATION_SERVER_METADATA_PATH,
            get(authorization_server_metadata),
        )
        .route(PROTECTED_RESOURCE_METADATA_PATH, get(protected_resource_metadata))
        .route(
            &format!("{PROTECTED_RESOURCE_METADATA_PATH}/{{*resource}}"),
            get(protected_resource_metadata),
        )
        .with_state(state)
}

/// An [`AuthError`] rendered as an OAuth error response
#[derive(Debug)]
pub struct OAuthErrorResponse(pub AuthError);

impl From<AuthError> for OAuthErrorResponse {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for OAuthErrorResponse {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = err.http_status();
        if status.is_server_error() {
            error!(error = %err, "OAuth endpoint failed");
        } else {
            debug!(error = %err, "OAuth request rejected");
        }

        let body = json!({
            "error": err.oauth_error_code(),
            "error_description": err.client_description(),
        });
        let mut response = (status, no_store_headers(), Json(body)).into_response();
        if err == AuthError::InvalidClient
            && let Ok(challenge) = HeaderValue::from_str(&format!("Basic realm=\"{REALM}\""))
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

fn no_store_headers() -> [(header::HeaderName, HeaderValue); 2] {
    [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
    ]
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizeQuery {
    response_type: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    scope: Option<String>,
    state: Option<String>,
}

fn error_redirect(redirect_uri: &str, err: &AuthError, state: Option<&str>) -> Response {
    let Ok(mut location) = Url::parse(redirect_uri) else {
        return OAuthErrorResponse(AuthError::InvalidRedirectUri(redirect_uri.to_string()))
            .into_response();
    };
    {
        let mut query = location.query_pairs_mut();
        query.append_pair("error", err.oauth_error_code());
        query.append_pair("error_description", &err.client_description());
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    found(&location)
}

fn found(location: &Url) -> Response {
    match HeaderValue::from_str(location.as_str()) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => OAuthErrorResponse(AuthError::InvalidRedirectUri(location.to_string()))
            .into_response(),
    }
}

async fn authorize(
    State(state): State<OAuthState>,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let Some(client_id) = query.client_id.as_deref() else {
        return OAuthErrorResponse(AuthError::InvalidRequest("client_id is required".into()))
            .into_response();
    };
    let Some(client) = state.registry.get_client(client_id) else {
        return OAuthErrorResponse(AuthError::InvalidRequest(format!(
            "unknown client_id '{client_id}'"
        )))
        .into_response();
    };
    let redirect_uri = match state
        .server
        .resolve_redirect_uri(&client, query.redirect_uri.as_deref())
    {
        Ok(uri) => uri,
        Err(err) => return OAuthErrorResponse(err).into_response(),
    };

    match authorization_params(&query, redirect_uri.clone()) {
        Ok(params) => match state.server.authorize(&client, params).await {
            Ok(redirect) => found(&redirect.location),
            Err(err) => error_redirect(&redirect_uri, &err, query.state.as_deref()),
        },
        Err(err) => error_redirect(&redirect_uri, &err, query.state.as_deref()),
    }
}

fn authorization_params(
    query: &AuthorizeQuery,
    redirect_uri: String,
) -> AuthResult<AuthorizationParams> {
    match query.response_type.as_deref() {
        Some("code") => {}
        Some(other) => return Err(AuthError::UnsupportedResponseType(other.to_string())),
        None => {
            return Err(AuthError::InvalidRequest(
                "response_type is required".to_string(),
            ));
        }
    }

    let challenge = query
        .code_challenge
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest("code_challenge is required".to_string()))?;
    let method = match query.code_challenge_method.as_deref() {
        Some(method) => method.parse::<CodeChallengeMethod>()?,
        None => CodeChallengeMethod::default(),
    };

    let mut params = AuthorizationParams::new(challenge)
        .with_method(method)
        .with_redirect_uri(redirect_uri);
    if let Some(scope) = query.scope.as_deref() {
        params = params.with_scopes(parse_scope(scope));
    }
    if let Some(client_state) = &query.state {
        params = params.with_state(client_state.clone());
    }
    Ok(params)
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
    refresh_token: Option<String>,
    scope: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RevokeRequest {
    token: Option<String>,
    token_type_hint: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

// client_secret_basic wins over client_secret_post; sending both for different clients is rejected
fn authenticate(
    registry: &ClientRegistry,
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> AuthResult<RegisteredClient> {
    if let Some((id, secret)) = basic_credentials(headers) {
        if form_id.is_some_and(|form_id| form_id != id) {
            return Err(AuthError::InvalidRequest(
                "client_id does not match the Authorization header".to_string(),
            ));
        }
        return registry.authenticate_client(&id, Some(&secret));
    }

    let id = form_id.ok_or(AuthError::InvalidClient)?;
    registry.authenticate_client(id, form_secret)
}

fn required<'a>(value: Option<&'a str>, name: &str) -> AuthResult<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest(format!("{name} is required")))
}

async fn token(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthErrorResponse> {
    let Form(request) = form.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;
    let client = authenticate(
        &state.registry,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;

    let grant_type = required(request.grant_type.as_deref(), "grant_type")?;
    if !client.allows_grant_type(grant_type) {
        return Err(AuthError::UnsupportedGrantType(grant_type.to_string()).into());
    }

    let tokens = match grant_type {
        "authorization_code" => {
            let code = required(request.code.as_deref(), "code")?;
            let verifier = required(request.code_verifier.as_deref(), "code_verifier")?;

            let challenge = state
                .server
                .challenge_for_authorization_code(&client, code)
                .await?;
            if !verify_code_verifier(verifier, &challenge) {
                return Err(AuthError::PkceVerificationFailed.into());
            }

            state
                .server
                .exchange_authorization_code(&client, code, request.redirect_uri.as_deref())
                .await?
        }
        "refresh_token" => {
            let refresh_token = required(request.refresh_token.as_deref(), "refresh_token")?;
            let scopes = request.scope.as_deref().map(parse_scope);
            state
                .server
                .exchange_refresh_token(&client, refresh_token, scopes.as_deref())
                .await?
        }
        other => return Err(AuthError::UnsupportedGrantType(other.to_string()).into()),
    };

    Ok((StatusCode::OK, no_store_headers(), Json(tokens)).into_response())
}

async fn register(
    State(state): State<OAuthState>,
    body: Result<Json<ClientMetadata>, JsonRejection>,
) -> Result<Response, OAuthErrorResponse> {
    let Json(metadata) = body.map_err(|e| AuthError::InvalidClientMetadata(e.body_text()))?;
    let client = state.registry.register_client(metadata)?;
    Ok((StatusCode::CREATED, no_store_headers(), Json(client)).into_response())
}

async fn revoke(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Result<StatusCode, OAuthErrorResponse> {
    let Form(request) = form.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;
    let client = authenticate(
        &state.registry,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let token = required(request.token.as_deref(), "token")?;

    state
        .server
        .revoke_token(&client, token, request.token_type_hint.as_deref())
        .await?;
    Ok(StatusCode::OK)
}

async fn authorization_server_metadata(State(state): State<OAuthState>) -> impl IntoResponse {
    Json(AuthorizationServerMetadata::for_server(
        state.server.settings(),
    ))
}

async fn protected_resource_metadata(State(state): State<OAuthState>) -> Response {
    match &state.resource {
        Some(metadata) => Json(metadata.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
