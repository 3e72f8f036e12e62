//! Authorization error taxonomy
//!
//! Every failure in this crate is one of the tagged variants of [`AuthError`].
//! Handlers switch on the variant (or on [`AuthError::oauth_error_code`] /
//! [`AuthError::http_status`]) rather than on message text.
//!
//! The `Display` output of a variant is meant for server-side logs. What goes
//! back to a client is [`AuthError::client_description`], which never carries
//! discovery URLs, key-store responses or other third-party text.

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Authorization and authentication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Dynamic client registration metadata was rejected
    #[error("Invalid client metadata: {0}")]
    InvalidClientMetadata(String),

    /// Redirect URI is not registered for the client
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),

    /// Unknown client or wrong client secret
    #[error("Invalid client credentials")]
    InvalidClient,

    /// Malformed or incomplete request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested scopes cannot be granted
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Grant type not supported by this server or client
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Response type not supported by this server
    #[error("Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Authorization code unknown, expired or already redeemed
    #[error("Invalid authorization code")]
    InvalidAuthorizationCode,

    /// Authorization code presented by a client it was not issued to
    #[error("Authorization code was issued to a different client")]
    ForeignAuthorizationCode,

    /// Refresh token unknown, expired or already rotated away
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Refresh token presented by a client it was not issued to
    #[error("Refresh token was issued to a different client")]
    ForeignRefreshToken,

    /// PKCE code verifier does not match the stored challenge
    #[error("Invalid code verifier")]
    PkceVerificationFailed,

    /// Access token unknown or expired
    #[error("Invalid access token")]
    InvalidAccessToken,

    /// OIDC discovery for an issuer failed
    #[error("OIDC discovery failed for issuer {issuer}: {reason}")]
    Discovery {
        /// Issuer whose discovery document could not be resolved
        issuer: String,
        /// What went wrong (server-side only)
        reason: String,
    },

    /// Fetching a key set or other remote document failed
    #[error("Fetching {url} failed: {reason}")]
    Fetch {
        /// Requested URL
        url: String,
        /// What went wrong (server-side only)
        reason: String,
    },

    /// Bearer token failed signature, issuer, audience or expiry checks
    #[error("invalid_token: {0}")]
    InvalidToken(String),

    /// Token is valid but lacks a required scope
    #[error("insufficient_scope: token lacks required scope '{required}'")]
    InsufficientScope {
        /// The scope that was required
        required: String,
    },

    /// Service-role key store lookup failed
    #[error("Service key lookup failed: {0}")]
    KeyStore(String),

    /// Verification did not complete within the request deadline
    #[error("Credential verification timed out")]
    Timeout,

    /// Origin header not on the allow-list
    #[error("Origin not allowed: {0}")]
    DisallowedOrigin(String),

    /// Strict mode requires a protocol-version header
    #[error("Missing MCP-Protocol-Version header")]
    MissingProtocolVersion,

    /// Protocol-version header names an unsupported version
    #[error("Unsupported MCP-Protocol-Version: {0}")]
    UnsupportedProtocolVersion(String),

    /// Invalid configuration detected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Grant store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// OAuth 2.0 / RFC 6750 error code for this failure
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::InvalidRedirectUri(_) | Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidScope(_) => "invalid_scope",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidAuthorizationCode
            | Self::ForeignAuthorizationCode
            | Self::InvalidRefreshToken
            | Self::ForeignRefreshToken
            | Self::PkceVerificationFailed => "invalid_grant",
            Self::InvalidAccessToken
            | Self::Discovery { .. }
            | Self::Fetch { .. }
            | Self::InvalidToken(_)
            | Self::KeyStore(_)
            | Self::Timeout => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::DisallowedOrigin(_) => "forbidden",
            Self::MissingProtocolVersion | Self::UnsupportedProtocolVersion(_) => {
                "invalid_request"
            }
            Self::Config(_) | Self::Storage(_) => "server_error",
        }
    }

    /// HTTP status code for this failure
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidClient
            | Self::InvalidAccessToken
            | Self::Discovery { .. }
            | Self::Fetch { .. }
            | Self::InvalidToken(_)
            | Self::KeyStore(_)
            | Self::Timeout => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } | Self::DisallowedOrigin(_) => StatusCode::FORBIDDEN,
            Self::Config(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Description that is safe to return to a client
    ///
    /// Verification failures collapse to one generic sentence so that an
    /// expired token cannot be told apart from a forged one.
    pub fn client_description(&self) -> String {
        match self {
            Self::Discovery { .. }
            | Self::Fetch { .. }
            | Self::InvalidToken(_)
            | Self::KeyStore(_)
            | Self::Timeout => {
                "The access token is invalid or expired".to_string()
            }
            Self::InsufficientScope { required } => {
                format!("The access token lacks the required scope '{required}'")
            }
            Self::Config(_) | Self::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this is a scope failure (403) rather than an authentication failure (401)
    pub fn is_insufficient_scope(&self) -> bool {
        matches!(self, Self::InsufficientScope { .. })
    }
}
