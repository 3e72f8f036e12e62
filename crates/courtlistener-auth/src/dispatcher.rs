//! Multi-scheme authentication dispatcher
//!
//! Decides, per request, whether the caller is authenticated and as whom.
//! Exactly one *primary* scheme is active, chosen from the configuration in
//! this order:
//!
//! 1. **OIDC bearer** when an issuer is configured. A token that fails
//!    verification (including discovery failure and timeout) may be rescued
//!    by a valid Cloudflare Access assertion, then by the static token when
//!    fallback is enabled. A token that verifies but lacks the required
//!    scope is refused with 403 and never rescued.
//! 2. **Service-role API key** when Supabase is configured. A miss or a store
//!    failure may be rescued by the static token when fallback is enabled.
//! 3. **Cloudflare Access assertion** when only Access is configured. The
//!    static token may rescue a failed assertion when fallback is enabled.
//! 4. **Static token** when it is the only thing configured.
//! 5. **Open** when nothing is configured. Every request is allowed; a
//!    warning is logged once at construction. A bearer minted by an attached
//!    [`AuthorizationServer`] is still resolved to its identity.
//!
//! A configured scheme is only ever satisfied by its own credential (or by
//! the rescues above). Tokens from the attached authorization server never
//! stand in for one: anyone may register and authorize against it.
//!
//! Every verification step runs under the configured deadline. Denials carry
//! a `WWW-Authenticate` challenge and the `X-MCP-Auth-Scheme` header naming
//! the scheme the server expected; internal error text never reaches them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderValue, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::authorization_server::AuthorizationServer;
use crate::challenge::WwwAuthenticateBuilder;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::oidc::{Claims, OidcVerifier, ReqwestFetcher, VerifiedToken, VerifyOptions};
use crate::request::RequestContext;
use crate::secret::secrets_match;
use crate::service_keys::{ServiceKeyStore, SupabaseKeyStore};

/// Response header naming the expected scheme on every denial
pub const AUTH_SCHEME_HEADER: &str = "x-mcp-auth-scheme";

/// Authentication schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// Access token minted by this server's authorization server
    #[serde(rename = "oauth")]
    AuthorizationServer,
    /// OIDC bearer JWT
    Oidc,
    /// Cloudflare Access identity assertion
    CloudflareAccess,
    /// Service-role API key
    ServiceKey,
    /// Static shared token
    StaticToken,
}

impl AuthScheme {
    /// Name used in logs and the `X-MCP-Auth-Scheme` header
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationServer => "oauth",
            Self::Oidc => "oidc",
            Self::CloudflareAccess => "cloudflare-access",
            Self::ServiceKey => "service-key",
            Self::StaticToken => "static-token",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a request was authenticated as
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    /// Scheme that accepted the request
    pub scheme: AuthScheme,
    /// Subject (user) identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Client or key identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Verified claims, for JWT-based schemes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
}

impl AuthIdentity {
    fn bare(scheme: AuthScheme) -> Self {
        Self {
            scheme,
            subject: None,
            client_id: None,
            scopes: Vec::new(),
            claims: None,
        }
    }

    fn from_verified(scheme: AuthScheme, token: VerifiedToken) -> Self {
        Self {
            scheme,
            subject: token.subject,
            client_id: token.client_id,
            scopes: token.scopes,
            claims: Some(token.claims),
        }
    }

    /// Whether the identity carries `scope`
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// A refused request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// 400, 401 or 403
    pub status: StatusCode,
    /// OAuth / RFC 6750 error code
    pub reason: &'static str,
    /// Scheme the server expected, if the denial came from the dispatcher
    pub scheme: Option<AuthScheme>,
    /// `WWW-Authenticate` value for 401 and 403 responses
    pub www_authenticate: Option<String>,
    /// Client-safe description
    pub description: String,
}

impl Denial {
    /// Denial for a transport guard failure
    pub fn from_guard_error(err: &AuthError) -> Self {
        Self {
            status: err.http_status(),
            reason: err.oauth_error_code(),
            scheme: None,
            www_authenticate: None,
            description: err.client_description(),
        }
    }

    /// JSON body `{"error": ..., "error_description": ...}`
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": self.reason,
            "error_description": self.description,
        })
    }

    /// Render as an HTTP response
    pub fn into_http_response<B>(self) -> http::Response<B>
    where
        B: From<String>,
    {
        let mut response = http::Response::new(B::from(self.body().to_string()));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(challenge) = self
            .www_authenticate
            .as_deref()
            .and_then(|c| HeaderValue::from_str(c).ok())
        {
            headers.insert(header::WWW_AUTHENTICATE, challenge);
        }
        if let Some(scheme) = self.scheme {
            headers.insert(AUTH_SCHEME_HEADER, HeaderValue::from_static(scheme.as_str()));
        }
        response
    }
}

/// Outcome of [`AuthDispatcher::authorize`]
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Proceed; `None` means the server runs open
    Allow(Option<AuthIdentity>),
    /// Refuse
    Deny(Denial),
}

impl Verdict {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primary {
    Oidc,
    ServiceKey,
    CloudflareAccess,
    StaticToken,
    Open,
}

/// Per-request authentication cascade
pub struct AuthDispatcher {
    oidc: Option<VerifyOptions>,
    cloudflare: Option<VerifyOptions>,
    verifier: Arc<OidcVerifier>,
    key_store: Option<Arc<dyn ServiceKeyStore>>,
    static_token: Option<SecretString>,
    allow_static_fallback: bool,
    timeout: Duration,
    resource_metadata_url: Option<String>,
    authorization_server: Option<AuthorizationServer>,
}

impl fmt::Debug for AuthDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthDispatcher")
            .field("primary", &self.primary())
            .field("oidc", &self.oidc)
            .field("cloudflare", &self.cloudflare)
            .field("key_store", &self.key_store)
            .field("static_token", &self.static_token.as_ref().map(|_| "[REDACTED]"))
            .field("allow_static_fallback", &self.allow_static_fallback)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AuthDispatcher {
    /// Build a dispatcher with the default collaborators
    ///
    /// OIDC and Access assertions are verified through a [`ReqwestFetcher`];
    /// service keys are looked up in Supabase when configured.
    ///
    /// # Errors
    ///
    /// [`AuthError::Config`] if an HTTP client cannot be built.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let verifier = Arc::new(OidcVerifier::new(Arc::new(ReqwestFetcher::new()?)));
        let key_store = match &config.service_keys {
            Some(settings) => {
                Some(Arc::new(SupabaseKeyStore::new(settings.clone())?) as Arc<dyn ServiceKeyStore>)
            }
            None => None,
        };
        Ok(Self::with_collaborators(config, verifier, key_store))
    }

    /// Build a dispatcher around explicit collaborators
    ///
    /// `key_store` is consulted only when the configuration enables service keys.
    pub fn with_collaborators(
        config: &AuthConfig,
        verifier: Arc<OidcVerifier>,
        key_store: Option<Arc<dyn ServiceKeyStore>>,
    ) -> Self {
        let dispatcher = Self {
            oidc: config.oidc.as_ref().map(VerifyOptions::from),
            cloudflare: config.cloudflare_access.as_ref().map(VerifyOptions::from),
            verifier,
            key_store: key_store.filter(|_| config.service_keys.is_some()),
            static_token: config.static_token.clone(),
            allow_static_fallback: config.allow_static_fallback,
            timeout: config.verification_timeout,
            resource_metadata_url: config.resource_metadata_url.clone(),
            authorization_server: None,
        };

        match dispatcher.primary() {
            Primary::Open => warn!(
                "No authentication scheme configured; every request will be allowed"
            ),
            primary => info!(
                primary = ?primary,
                static_fallback = dispatcher.allow_static_fallback,
                "Authentication dispatcher ready"
            ),
        }
        if dispatcher.allow_static_fallback && dispatcher.static_token.is_none() {
            warn!("MCP_ALLOW_STATIC_TOKEN_FALLBACK is set but no static token is configured");
        }
        dispatcher
    }

    /// Resolve access tokens minted by `server` when running open
    #[must_use]
    pub fn with_authorization_server(mut self, server: AuthorizationServer) -> Self {
        self.authorization_server = Some(server);
        self
    }

    /// Whether every request is allowed because nothing is configured
    pub fn is_open(&self) -> bool {
        self.primary() == Primary::Open
    }

    fn primary(&self) -> Primary {
        if self.oidc.is_some() {
            Primary::Oidc
        } else if self.key_store.is_some() {
            Primary::ServiceKey
        } else if self.cloudflare.is_some() {
            Primary::CloudflareAccess
        } else if self.static_token.is_some() {
            Primary::StaticToken
        } else {
            Primary::Open
        }
    }

    /// Authenticate a request
    pub async fn authorize(&self, request: &RequestContext) -> Verdict {
        let verdict = match self.primary() {
            Primary::Oidc => self.authorize_oidc(request).await,
            Primary::ServiceKey => self.authorize_service_key(request).await,
            Primary::CloudflareAccess => self.authorize_cloudflare(request).await,
            Primary::StaticToken => self.authorize_static(request),
            Primary::Open => Verdict::Allow(self.try_local_token(request).await),
        };

        match &verdict {
            Verdict::Allow(Some(identity)) => debug!(
                scheme = %identity.scheme,
                subject = ?identity.subject,
                path = %request.path,
                "Request authenticated"
            ),
            Verdict::Allow(None) => {}
            Verdict::Deny(denial) => info!(
                status = denial.status.as_u16(),
                reason = denial.reason,
                path = %request.path,
                "Request denied"
            ),
        }
        verdict
    }

    async fn authorize_oidc(&self, request: &RequestContext) -> Verdict {
        let Some(options) = &self.oidc else {
            return Verdict::Allow(None);
        };

        let Some(token) = request.bearer_token() else {
            if let Some(identity) = self.try_cloudflare(request).await {
                return Verdict::Allow(Some(identity));
            }
            return Verdict::Deny(self.missing_credentials(AuthScheme::Oidc));
        };

        let result = self
            .within_deadline(self.verifier.verify_access_token(token, options))
            .await;

        match result {
            Ok(verified) => Verdict::Allow(Some(AuthIdentity::from_verified(
                AuthScheme::Oidc,
                verified,
            ))),
            Err(err @ AuthError::InsufficientScope { .. }) => {
                Verdict::Deny(self.insufficient_scope(AuthScheme::Oidc, &err))
            }
            Err(err) => {
                warn!(error = %err, "OIDC bearer verification failed");
                if let Some(identity) = self.try_cloudflare(request).await {
                    return Verdict::Allow(Some(identity));
                }
                if let Some(identity) = self.try_static_fallback(token) {
                    return Verdict::Allow(Some(identity));
                }
                Verdict::Deny(self.invalid_credentials(AuthScheme::Oidc, &err))
            }
        }
    }

    async fn authorize_service_key(&self, request: &RequestContext) -> Verdict {
        let Some(store) = &self.key_store else {
            return Verdict::Allow(None);
        };
        let Some(key) = request.bearer_token() else {
            return Verdict::Deny(self.missing_credentials(AuthScheme::ServiceKey));
        };

        let err = match self.within_deadline(store.lookup(key)).await {
            Ok(Some(identity)) => {
                return Verdict::Allow(Some(AuthIdentity {
                    scheme: AuthScheme::ServiceKey,
                    subject: identity.user_id,
                    client_id: Some(identity.key_id),
                    scopes: identity.scopes,
                    claims: None,
                }));
            }
            Ok(None) => AuthError::InvalidToken("unknown or revoked service key".to_string()),
            Err(err) => {
                warn!(error = %err, "Service key lookup failed");
                err
            }
        };

        if let Some(identity) = self.try_static_fallback(key) {
            return Verdict::Allow(Some(identity));
        }
        Verdict::Deny(self.invalid_credentials(AuthScheme::ServiceKey, &err))
    }

    async fn authorize_cloudflare(&self, request: &RequestContext) -> Verdict {
        let Some(options) = &self.cloudflare else {
            return Verdict::Allow(None);
        };

        let err = match request.cloudflare_assertion() {
            Some(assertion) => {
                match self
                    .within_deadline(self.verifier.verify_access_token(assertion, options))
                    .await
                {
                    Ok(verified) => {
                        return Verdict::Allow(Some(AuthIdentity::from_verified(
                            AuthScheme::CloudflareAccess,
                            verified,
                        )));
                    }
                    Err(err) => {
                        warn!(error = %err, "Cloudflare Access assertion rejected");
                        Some(err)
                    }
                }
            }
            None => None,
        };

        if let Some(token) = request.bearer_token()
            && let Some(identity) = self.try_static_fallback(token)
        {
            return Verdict::Allow(Some(identity));
        }

        match err {
            Some(err) => Verdict::Deny(self.invalid_credentials(AuthScheme::CloudflareAccess, &err)),
            None => Verdict::Deny(self.missing_credentials(AuthScheme::CloudflareAccess)),
        }
    }

    fn authorize_static(&self, request: &RequestContext) -> Verdict {
        let Some(token) = request.bearer_token() else {
            return Verdict::Deny(self.missing_credentials(AuthScheme::StaticToken));
        };
        if self.static_matches(token) {
            return Verdict::Allow(Some(AuthIdentity::bare(AuthScheme::StaticToken)));
        }
        debug!("Static token mismatch");
        Verdict::Deny(self.invalid_credentials(
            AuthScheme::StaticToken,
            &AuthError::InvalidToken("static token mismatch".to_string()),
        ))
    }

    async fn try_local_token(&self, request: &RequestContext) -> Option<AuthIdentity> {
        let server = self.authorization_server.as_ref()?;
        let token = request.bearer_token()?;
        let info = server.verify_access_token(token).await.ok()?;
        Some(AuthIdentity {
            scheme: AuthScheme::AuthorizationServer,
            subject: None,
            client_id: Some(info.client_id),
            scopes: info.scopes,
            claims: None,
        })
    }

    async fn try_cloudflare(&self, request: &RequestContext) -> Option<AuthIdentity> {
        let options = self.cloudflare.as_ref()?;
        let assertion = request.cloudflare_assertion()?;

        match self
            .within_deadline(self.verifier.verify_access_token(assertion, options))
            .await
        {
            Ok(verified) => {
                info!(subject = ?verified.subject, "Request rescued by Cloudflare Access assertion");
                Some(AuthIdentity::from_verified(
                    AuthScheme::CloudflareAccess,
                    verified,
                ))
            }
            Err(err) => {
                debug!(error = %err, "Cloudflare Access assertion did not verify");
                None
            }
        }
    }

    fn try_static_fallback(&self, token: &str) -> Option<AuthIdentity> {
        if !self.allow_static_fallback || !self.static_matches(token) {
            return None;
        }
        warn!("Request accepted through static token fallback");
        Some(AuthIdentity::bare(AuthScheme::StaticToken))
    }

    fn static_matches(&self, token: &str) -> bool {
        self.static_token
            .as_ref()
            .is_some_and(|expected| secrets_match(token, expected.expose_secret()))
    }

    async fn within_deadline<T, F>(&self, verification: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        tokio::time::timeout(self.timeout, verification)
            .await
            .unwrap_or_else(|_| {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Credential verification timed out");
                Err(AuthError::Timeout)
            })
    }

    fn challenge(&self) -> WwwAuthenticateBuilder {
        WwwAuthenticateBuilder::new().with_resource_metadata(self.resource_metadata_url.as_deref())
    }

    fn missing_credentials(&self, scheme: AuthScheme) -> Denial {
        Denial {
            status: StatusCode::UNAUTHORIZED,
            reason: "invalid_request",
            scheme: Some(scheme),
            www_authenticate: Some(self.challenge().build()),
            description: "Authentication required".to_string(),
        }
    }

    fn invalid_credentials(&self, scheme: AuthScheme, err: &AuthError) -> Denial {
        let description = err.client_description();
        Denial {
            status: StatusCode::UNAUTHORIZED,
            reason: "invalid_token",
            scheme: Some(scheme),
            www_authenticate: Some(
                self.challenge()
                    .with_error("invalid_token", Some(&description))
                    .build(),
            ),
            description,
        }
    }

    fn insufficient_scope(&self, scheme: AuthScheme, err: &AuthError) -> Denial {
        let description = err.client_description();
        let mut challenge = self
            .challenge()
            .with_error("insufficient_scope", Some(&description));
        if let AuthError::InsufficientScope { required } = err {
            challenge = challenge.with_scope(required);
        }
        Denial {
            status: StatusCode::FORBIDDEN,
            reason: "insufficient_scope",
            scheme: Some(scheme),
            www_authenticate: Some(challenge.build()),
            description,
        }
    }
}
