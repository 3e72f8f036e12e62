//! OIDC access token verification
//!
//! [`OidcVerifier`] turns a bearer JWT into a [`VerifiedToken`]:
//!
//! 1. Resolve the key set URL: the configured `jwks_url`, or OIDC discovery
//!    on the issuer.
//! 2. Load the key set through the [`KeyCache`]. A `kid` missing from the
//!    cached set forces one rate-limited refetch, which covers key rotation.
//! 3. Check signature, issuer, audience (when configured) and expiry with the
//!    [`JwtVerifier`], allowing 60 seconds of clock skew.
//! 4. Extract scopes and enforce the required scope, if any.
//!
//! The signature step is pluggable. [`JsonWebTokenVerifier`] is the default
//! and accepts ES256, RS256 and PS256 only.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use tracing::{debug, warn};

use super::Claims;
use super::fetch::HttpFetcher;
use super::jwks::KeyCache;
use crate::config::{CloudflareAccessSettings, OidcSettings};
use crate::error::{AuthError, AuthResult};
use crate::scope::parse_scope;

/// Default clock skew tolerance
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// What a token must satisfy besides its signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationParams {
    /// Expected `iss`
    pub issuer: String,
    /// Expected `aud`, unchecked when `None`
    pub audience: Option<String>,
}

/// Verifies a compact JWT against a key set
pub trait JwtVerifier: Send + Sync + Debug {
    /// Verify signature and registered claims, returning the claim set
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] for any verification failure.
    fn verify(&self, token: &str, keys: &JwkSet, params: &VerificationParams)
    -> AuthResult<Claims>;
}

/// [`JwtVerifier`] backed by the `jsonwebtoken` crate
#[derive(Debug, Clone)]
pub struct JsonWebTokenVerifier {
    allowed_algorithms: Vec<Algorithm>,
    leeway: Duration,
}

impl Default for JsonWebTokenVerifier {
    fn default() -> Self {
        Self {
            allowed_algorithms: vec![Algorithm::ES256, Algorithm::RS256, Algorithm::PS256],
            leeway: DEFAULT_LEEWAY,
        }
    }
}

impl JsonWebTokenVerifier {
    /// Verifier with the default algorithm allow-list and leeway
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the algorithm allow-list
    ///
    /// Never include `none`-style or shared-secret algorithms for tokens
    /// issued by a third party.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Replace the clock skew tolerance
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Allowed algorithms
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }
}

impl JwtVerifier for JsonWebTokenVerifier {
    fn verify(
        &self,
        token: &str,
        keys: &JwkSet,
        params: &VerificationParams,
    ) -> AuthResult<Claims> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode JWT header");
            AuthError::InvalidToken(format!("malformed JWT: {e}"))
        })?;

        if !self.allowed_algorithms.contains(&header.alg) {
            warn!(algorithm = ?header.alg, allowed = ?self.allowed_algorithms, "JWT algorithm not allowed");
            return Err(AuthError::InvalidToken(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let jwk = match header.kid.as_deref() {
            Some(kid) => keys
                .find(kid)
                .ok_or_else(|| AuthError::InvalidToken(format!("unknown key id '{kid}'")))?,
            None => match keys.keys.as_slice() {
                [only] => only,
                _ => {
                    return Err(AuthError::InvalidToken(
                        "JWT has no kid and the key set is ambiguous".to_string(),
                    ));
                }
            },
        };

        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| AuthError::InvalidToken(format!("unusable JWK: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway.as_secs();
        validation.set_issuer(&[params.issuer.as_str()]);
        match &params.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &key, &validation).map_err(|e| {
            debug!(error = %e, issuer = %params.issuer, "JWT validation failed");
            AuthError::InvalidToken(e.to_string())
        })?;
        Ok(data.claims)
    }
}

/// Per-call verification options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Expected issuer
    pub issuer: String,
    /// Expected audience
    pub audience: Option<String>,
    /// Key set URL, discovered from the issuer when `None`
    pub jwks_url: Option<String>,
    /// Scope the token must carry
    pub required_scope: Option<String>,
}

impl From<&OidcSettings> for VerifyOptions {
    fn from(settings: &OidcSettings) -> Self {
        Self {
            issuer: settings.issuer.clone(),
            audience: settings.audience.clone(),
            jwks_url: settings.jwks_url.clone(),
            required_scope: settings.required_scope.clone(),
        }
    }
}

impl From<&CloudflareAccessSettings> for VerifyOptions {
    fn from(settings: &CloudflareAccessSettings) -> Self {
        Self {
            issuer: settings.issuer(),
            audience: Some(settings.audience.clone()),
            jwks_url: Some(settings.jwks_url()),
            required_scope: None,
        }
    }
}

/// A verified token
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    /// `sub` claim
    pub subject: Option<String>,
    /// `client_id` or `azp` claim
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Full claim set
    pub claims: Claims,
}

/// Scopes carried by a token
///
/// Reads a space-delimited `scope` string or an `scp` array of strings.
/// Anything else, including a malformed claim, grants nothing.
pub fn scopes_from_claims(claims: &Claims) -> Vec<String> {
    if let Some(scope) = claims.get("scope") {
        return scope.as_str().map(parse_scope).unwrap_or_default();
    }

    let Some(scp) = claims.get("scp").and_then(serde_json::Value::as_array) else {
        return Vec::new();
    };
    let scopes: Option<Vec<String>> = scp
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect();
    scopes.unwrap_or_default()
}

/// Verifies bearer JWTs issued by OIDC providers
#[derive(Debug)]
pub struct OidcVerifier {
    keys: KeyCache,
    jwt: Arc<dyn JwtVerifier>,
}

impl OidcVerifier {
    /// Verifier using `fetcher` and [`JsonWebTokenVerifier`]
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self::with_key_cache(KeyCache::new(fetcher))
    }

    /// Verifier over a preconfigured key cache
    pub fn with_key_cache(keys: KeyCache) -> Self {
        Self {
            keys,
            jwt: Arc::new(JsonWebTokenVerifier::default()),
        }
    }

    /// Replace the JWT verifier
    #[must_use]
    pub fn with_jwt_verifier(mut self, jwt: Arc<dyn JwtVerifier>) -> Self {
        self.jwt = jwt;
        self
    }

    /// The underlying key cache
    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// Verify a bearer token
    ///
    /// # Errors
    ///
    /// - [`AuthError::Discovery`] if the issuer's discovery document is unusable
    /// - [`AuthError::Fetch`] if the key set cannot be loaded
    /// - [`AuthError::InvalidToken`] if signature or claims do not verify
    /// - [`AuthError::InsufficientScope`] if the required scope is missing
    pub async fn verify_access_token(
        &self,
        token: &str,
        options: &VerifyOptions,
    ) -> AuthResult<VerifiedToken> {
        // Reject non-JWT bearers before touching the network
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Bearer token is not a JWT");
            AuthError::InvalidToken(format!("malformed token: {e}"))
        })?;

        let jwks_url = match &options.jwks_url {
            Some(url) => url.clone(),
            None => self.keys.jwks_uri_for_issuer(&options.issuer).await?,
        };

        let mut keys = self.keys.key_set(&jwks_url).await?;

        // Key rotation: the token may be signed with a key newer than our cache
        if let Some(kid) = header.kid.as_deref()
            && keys.find(kid).is_none()
        {
            debug!(kid = %kid, jwks_uri = %jwks_url, "Unknown kid, refreshing JWKS");
            if let Some(fresh) = self.keys.refresh_key_set(&jwks_url).await? {
                keys = fresh;
            }
        }

        let params = VerificationParams {
            issuer: options.issuer.clone(),
            audience: options.audience.clone(),
        };
        let claims = self.jwt.verify(token, &keys, &params)?;
        let scopes = scopes_from_claims(&claims);

        if let Some(required) = &options.required_scope
            && !scopes.iter().any(|s| s == required)
        {
            debug!(required = %required, granted = ?scopes, "Token lacks required scope");
            return Err(AuthError::InsufficientScope {
                required: required.clone(),
            });
        }

        let claim_str = |name: &str| {
            claims
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        };
        let subject = claim_str("sub");
        let client_id = claim_str("client_id").or_else(|| claim_str("azp"));

        debug!(issuer = %options.issuer, subject = ?subject, "Token verified");
        Ok(VerifiedToken {
            subject,
            client_id,
            scopes,
            claims,
        })
    }
}
