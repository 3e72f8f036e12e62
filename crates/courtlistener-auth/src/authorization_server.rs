//! OAuth 2.1 authorization server
//!
//! Implements the authorization code grant with PKCE, refresh token rotation
//! with scope narrowing, opaque access token verification and RFC 7009
//! revocation. All grant state lives in a [`GrantStore`] under the key
//! prefixes `code:`, `access:` and `refresh:`.
//!
//! Authorization codes and refresh tokens are single use. Redemption goes
//! through [`GrantStore::take`], so when two requests race on the same
//! credential exactly one of them gets tokens and the other sees
//! [`AuthError::InvalidAuthorizationCode`] or [`AuthError::InvalidRefreshToken`].
//!
//! PKCE is checked by the token endpoint before redemption: it fetches the
//! stored challenge with
//! [`AuthorizationServer::challenge_for_authorization_code`] and verifies the
//! presented verifier with [`crate::pkce::verify_code_verifier`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AuthorizationServerSettings;
use crate::error::{AuthError, AuthResult};
use crate::pkce::{CodeChallengeMethod, PkceChallenge};
use crate::registry::RegisteredClient;
use crate::scope::{ScopeSet, format_scope, narrow};
use crate::secret::generate_token;
use crate::storage::{
    AccessTokenRecord, AuthorizationCodeRecord, GrantRecord, GrantStore, InMemoryGrantStore,
    RefreshTokenRecord,
};

const CODE_PREFIX: &str = "code:";
const ACCESS_PREFIX: &str = "access:";
const REFRESH_PREFIX: &str = "refresh:";

/// Parameters of an authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationParams {
    /// Where to send the code; may be omitted when exactly one URI is registered
    pub redirect_uri: Option<String>,
    /// PKCE challenge
    pub code_challenge: String,
    /// PKCE challenge method
    pub code_challenge_method: CodeChallengeMethod,
    /// Requested scopes; `None` requests everything supported
    pub scopes: Option<Vec<String>>,
    /// Opaque client state echoed on the redirect
    pub state: Option<String>,
}

impl AuthorizationParams {
    /// S256 request with no explicit redirect, scopes or state
    pub fn new(code_challenge: impl Into<String>) -> Self {
        Self {
            redirect_uri: None,
            code_challenge: code_challenge.into(),
            code_challenge_method: CodeChallengeMethod::S256,
            scopes: None,
            state: None,
        }
    }

    /// Set the redirect URI
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Request specific scopes
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Set the state parameter
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Use a different challenge method
    #[must_use]
    pub fn with_method(mut self, method: CodeChallengeMethod) -> Self {
        self.code_challenge_method = method;
        self
    }
}

/// Outcome of a successful authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    /// Redirect target carrying `code` and, when supplied, `state`
    pub location: Url,
    /// The minted authorization code
    pub code: String,
    /// Scopes bound to the code
    pub scopes: Vec<String>,
}

/// Token endpoint response (RFC 6749 Section 5.1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque access token
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Rotating refresh token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Space-delimited granted scopes
    pub scope: String,
}

/// What an access token grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// The verified token
    pub token: String,
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry, seconds since the epoch
    pub expires_at: i64,
}

fn expiry(ttl: Duration) -> AuthResult<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| AuthError::Config(format!("grant lifetime {ttl:?} is out of range")))
}

/// OAuth 2.1 authorization server
#[derive(Debug, Clone)]
pub struct AuthorizationServer {
    store: Arc<dyn GrantStore>,
    scopes: ScopeSet,
    settings: AuthorizationServerSettings,
}

impl AuthorizationServer {
    /// Create a server over an existing grant store
    pub fn new(settings: AuthorizationServerSettings, store: Arc<dyn GrantStore>) -> Self {
        Self {
            store,
            scopes: ScopeSet::new(settings.supported_scopes.iter().cloned()),
            settings,
        }
    }

    /// Create a server backed by an [`InMemoryGrantStore`]
    pub fn in_memory(settings: AuthorizationServerSettings) -> Self {
        Self::new(settings, Arc::new(InMemoryGrantStore::new()))
    }

    /// Server settings
    pub fn settings(&self) -> &AuthorizationServerSettings {
        &self.settings
    }

    /// Grantable scopes
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Handle an authorization request by minting a code
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRedirectUri`] if the redirect URI is not
    ///   registered, or omitted while several are registered
    /// - [`AuthError::InvalidRequest`] without a code challenge
    /// - [`AuthError::InvalidScope`] if none of the requested scopes are supported
    pub async fn authorize(
        &self,
        client: &RegisteredClient,
        params: AuthorizationParams,
    ) -> AuthResult<AuthorizationRedirect> {
        if !client.allows_grant_type("authorization_code") {
            return Err(AuthError::UnsupportedGrantType(
                "authorization_code".to_string(),
            ));
        }

        let redirect_uri = self.resolve_redirect_uri(client, params.redirect_uri.as_deref())?;

        if params.code_challenge.is_empty() {
            return Err(AuthError::InvalidRequest(
                "code_challenge is required".to_string(),
            ));
        }

        let scopes = self.scopes.grant(params.scopes.as_deref())?;

        let code = generate_token();
        let record = AuthorizationCodeRecord {
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.clone(),
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            scopes: scopes.clone(),
            expires_at: expiry(self.settings.code_ttl)?,
        };
        self.store
            .put(
                &format!("{CODE_PREFIX}{code}"),
                GrantRecord::AuthorizationCode(record),
                self.settings.code_ttl,
            )
            .await?;

        let mut location = Url::parse(&redirect_uri)
            .map_err(|e| AuthError::InvalidRedirectUri(format!("{redirect_uri}: {e}")))?;
        {
            let mut query = location.query_pairs_mut();
            query.append_pair("code", &code);
            if let Some(state) = &params.state {
                query.append_pair("state", state);
            }
        }

        info!(
            client_id = %client.client_id,
            scope = %format_scope(&scopes),
            "Issued authorization code"
        );
        Ok(AuthorizationRedirect {
            location,
            code,
            scopes,
        })
    }

    /// Return the PKCE challenge stored with an authorization code
    ///
    /// Does not consume the code.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidAuthorizationCode`] for unknown, expired or redeemed
    /// codes; [`AuthError::ForeignAuthorizationCode`] when `client` is not the
    /// client the code was issued to.
    pub async fn challenge_for_authorization_code(
        &self,
        client: &RegisteredClient,
        code: &str,
    ) -> AuthResult<PkceChallenge> {
        let record = self.load_code(client, code).await?;
        Ok(PkceChallenge {
            challenge: record.code_challenge,
            method: record.code_challenge_method,
        })
    }

    /// Redeem an authorization code for an access/refresh token pair
    ///
    /// A failed attempt by another client leaves the code redeemable by its
    /// owner.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidAuthorizationCode`] for unknown, expired or already
    /// redeemed codes and for a mismatching `redirect_uri`;
    /// [`AuthError::ForeignAuthorizationCode`] when the code belongs to
    /// another client.
    pub async fn exchange_authorization_code(
        &self,
        client: &RegisteredClient,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        if !client.allows_grant_type("authorization_code") {
            return Err(AuthError::UnsupportedGrantType(
                "authorization_code".to_string(),
            ));
        }

        let record = self.load_code(client, code).await?;

        if let Some(redirect_uri) = redirect_uri
            && redirect_uri != record.redirect_uri
        {
            warn!(
                client_id = %client.client_id,
                "Authorization code presented with a different redirect_uri"
            );
            return Err(AuthError::InvalidAuthorizationCode);
        }

        if self
            .store
            .take(&format!("{CODE_PREFIX}{code}"))
            .await?
            .is_none()
        {
            warn!(client_id = %client.client_id, "Authorization code already redeemed");
            return Err(AuthError::InvalidAuthorizationCode);
        }

        let response = self.issue_tokens(&client.client_id, record.scopes).await?;
        info!(
            client_id = %client.client_id,
            scope = %response.scope,
            "Exchanged authorization code for tokens"
        );
        Ok(response)
    }

    /// Rotate a refresh token, optionally narrowing its scopes
    ///
    /// The presented token is consumed; the response carries its replacement.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRefreshToken`] for unknown, expired or already
    /// rotated tokens; [`AuthError::ForeignRefreshToken`] when the token
    /// belongs to another client; [`AuthError::InvalidScope`] when none of the
    /// requested scopes were part of the original grant.
    pub async fn exchange_refresh_token(
        &self,
        client: &RegisteredClient,
        refresh_token: &str,
        requested_scopes: Option<&[String]>,
    ) -> AuthResult<TokenResponse> {
        if !client.allows_grant_type("refresh_token") {
            return Err(AuthError::UnsupportedGrantType("refresh_token".to_string()));
        }

        let key = format!("{REFRESH_PREFIX}{refresh_token}");
        let record = match self.store.get(&key).await? {
            Some(GrantRecord::RefreshToken(record)) if record.expires_at > Utc::now() => record,
            _ => {
                debug!(client_id = %client.client_id, "Unknown or expired refresh token");
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        if record.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                owner = %record.client_id,
                "Refresh token presented by a different client"
            );
            return Err(AuthError::ForeignRefreshToken);
        }

        let scopes = match requested_scopes {
            Some(requested) => narrow(&record.scopes, requested)?,
            None => record.scopes,
        };

        if self.store.take(&key).await?.is_none() {
            warn!(client_id = %client.client_id, "Refresh token already rotated");
            return Err(AuthError::InvalidRefreshToken);
        }

        let response = self.issue_tokens(&client.client_id, scopes).await?;
        info!(
            client_id = %client.client_id,
            scope = %response.scope,
            "Rotated refresh token"
        );
        Ok(response)
    }

    /// Verify an opaque access token
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidAccessToken`] for unknown, revoked or expired tokens.
    pub async fn verify_access_token(&self, token: &str) -> AuthResult<AuthInfo> {
        match self.store.get(&format!("{ACCESS_PREFIX}{token}")).await? {
            Some(GrantRecord::AccessToken(record)) if record.expires_at > Utc::now() => {
                Ok(AuthInfo {
                    token: token.to_string(),
                    client_id: record.client_id,
                    scopes: record.scopes,
                    expires_at: record.expires_at.timestamp(),
                })
            }
            _ => Err(AuthError::InvalidAccessToken),
        }
    }

    /// Revoke an access or refresh token (RFC 7009)
    ///
    /// Unknown tokens and tokens owned by other clients are ignored, so the
    /// endpoint reveals nothing about them.
    ///
    /// # Errors
    ///
    /// Only storage failures.
    pub async fn revoke_token(
        &self,
        client: &RegisteredClient,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> AuthResult<()> {
        let prefixes = match token_type_hint {
            Some("refresh_token") => [REFRESH_PREFIX, ACCESS_PREFIX],
            _ => [ACCESS_PREFIX, REFRESH_PREFIX],
        };

        for prefix in prefixes {
            let key = format!("{prefix}{token}");
            let owner = match self.store.get(&key).await? {
                Some(GrantRecord::AccessToken(record)) => record.client_id,
                Some(GrantRecord::RefreshToken(record)) => record.client_id,
                _ => continue,
            };

            if owner == client.client_id {
                self.store.delete(&key).await?;
                info!(client_id = %client.client_id, kind = %prefix.trim_end_matches(':'), "Revoked token");
            } else {
                warn!(
                    client_id = %client.client_id,
                    owner = %owner,
                    "Ignoring revocation of a token owned by another client"
                );
            }
            return Ok(());
        }

        debug!(client_id = %client.client_id, "Revocation of unknown token ignored");
        Ok(())
    }

    /// Pick the redirect URI for an authorization request
    ///
    /// An explicit URI must be registered (exact match). Omitting it is
    /// allowed only when the client registered exactly one.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidRedirectUri`] otherwise.
    pub fn resolve_redirect_uri(
        &self,
        client: &RegisteredClient,
        requested: Option<&str>,
    ) -> AuthResult<String> {
        match requested {
            Some(uri) if client.has_redirect_uri(uri) => Ok(uri.to_string()),
            Some(uri) => {
                warn!(client_id = %client.client_id, redirect_uri = %uri, "Unregistered redirect URI");
                Err(AuthError::InvalidRedirectUri(format!(
                    "'{uri}' is not registered for this client"
                )))
            }
            None => match client.redirect_uris.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(AuthError::InvalidRedirectUri(
                    "redirect_uri is required when several are registered".to_string(),
                )),
            },
        }
    }

    async fn load_code(
        &self,
        client: &RegisteredClient,
        code: &str,
    ) -> AuthResult<AuthorizationCodeRecord> {
        let record = match self.store.get(&format!("{CODE_PREFIX}{code}")).await? {
            Some(GrantRecord::AuthorizationCode(record)) if record.expires_at > Utc::now() => {
                record
            }
            _ => {
                debug!(client_id = %client.client_id, "Unknown or expired authorization code");
                return Err(AuthError::InvalidAuthorizationCode);
            }
        };

        if record.client_id != client.client_id {
            warn!(
                client_id = %client.client_id,
                owner = %record.client_id,
                "Authorization code presented by a different client"
            );
            return Err(AuthError::ForeignAuthorizationCode);
        }
        Ok(record)
    }

    async fn issue_tokens(&self, client_id: &str, scopes: Vec<String>) -> AuthResult<TokenResponse> {
        let access_token = generate_token();
        let refresh_token = generate_token();
        let access_ttl = self.settings.access_token_ttl;
        let refresh_ttl = self.settings.refresh_token_ttl;

        self.store
            .put(
                &format!("{ACCESS_PREFIX}{access_token}"),
                GrantRecord::AccessToken(AccessTokenRecord {
                    client_id: client_id.to_string(),
                    scopes: scopes.clone(),
                    expires_at: expiry(access_ttl)?,
                }),
                access_ttl,
            )
            .await?;
        self.store
            .put(
                &format!("{REFRESH_PREFIX}{refresh_token}"),
                GrantRecord::RefreshToken(RefreshTokenRecord {
                    client_id: client_id.to_string(),
                    scopes: scopes.clone(),
                    expires_at: expiry(refresh_ttl)?,
                }),
                refresh_ttl,
            )
            .await?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: access_ttl.as_secs(),
            refresh_token: Some(refresh_token),
            scope: format_scope(&scopes),
        })
    }
}
