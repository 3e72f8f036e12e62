//! Discovery documents served by this server
//!
//! - [`AuthorizationServerMetadata`] at `/.well-known/oauth-authorization-server` (RFC 8414)
//! - [`ProtectedResourceMetadata`] at `/.well-known/oauth-protected-resource` (RFC 9728)

use serde::{Deserialize, Serialize};

use crate::config::AuthorizationServerSettings;
use crate::pkce::CodeChallengeMethod;
use crate::registry::{SUPPORTED_GRANT_TYPES, SUPPORTED_RESPONSE_TYPES, TokenEndpointAuthMethod};

/// Path of the authorization server metadata document
pub const AUTHORIZATION_SERVER_METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

/// Path of the protected resource metadata document
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// OAuth 2.0 Authorization Server Metadata (RFC 8414)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
    /// Issuer identifier
    pub issuer: String,
    /// Authorization endpoint
    pub authorization_endpoint: String,
    /// Token endpoint
    pub token_endpoint: String,
    /// Dynamic registration endpoint
    pub registration_endpoint: String,
    /// Revocation endpoint (RFC 7009)
    pub revocation_endpoint: String,
    /// Grantable scopes
    pub scopes_supported: Vec<String>,
    /// Always `code`
    pub response_types_supported: Vec<String>,
    /// `authorization_code` and `refresh_token`
    pub grant_types_supported: Vec<String>,
    /// Client authentication methods at the token endpoint
    pub token_endpoint_auth_methods_supported: Vec<String>,
    /// Client authentication methods at the revocation endpoint
    pub revocation_endpoint_auth_methods_supported: Vec<String>,
    /// PKCE methods
    pub code_challenge_methods_supported: Vec<String>,
}

impl AuthorizationServerMetadata {
    /// Metadata for a server configured with `settings`
    pub fn for_server(settings: &AuthorizationServerSettings) -> Self {
        let issuer = settings.issuer_url.trim_end_matches('/').to_string();
        let auth_methods: Vec<String> = [
            TokenEndpointAuthMethod::ClientSecretBasic,
            TokenEndpointAuthMethod::ClientSecretPost,
            TokenEndpointAuthMethod::None,
        ]
        .iter()
        .map(|m| m.to_string())
        .collect();

        Self {
            authorization_endpoint: format!("{issuer}/authorize"),
            token_endpoint: format!("{issuer}/token"),
            registration_endpoint: format!("{issuer}/register"),
            revocation_endpoint: format!("{issuer}/revoke"),
            scopes_supported: settings.supported_scopes.clone(),
            response_types_supported: owned(SUPPORTED_RESPONSE_TYPES),
            grant_types_supported: owned(SUPPORTED_GRANT_TYPES),
            token_endpoint_auth_methods_supported: auth_methods.clone(),
            revocation_endpoint_auth_methods_supported: auth_methods,
            code_challenge_methods_supported: vec![
                CodeChallengeMethod::S256.to_string(),
                CodeChallengeMethod::Plain.to_string(),
            ],
            issuer,
        }
    }
}

/// OAuth 2.0 Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    /// Resource identifier
    pub resource: String,
    /// Authorization servers that issue tokens for the resource
    pub authorization_servers: Vec<String>,
    /// Scopes the resource understands
    pub scopes_supported: Vec<String>,
    /// Where bearer tokens may be sent
    pub bearer_methods_supported: Vec<String>,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

impl ProtectedResourceMetadata {
    /// Metadata for `resource`, protected by the listed authorization servers
    pub fn new(resource: impl Into<String>, authorization_servers: Vec<String>) -> Self {
        Self {
            resource: resource.into(),
            authorization_servers,
            scopes_supported: Vec::new(),
            bearer_methods_supported: vec!["header".to_string()],
            resource_name: None,
        }
    }

    /// Set the supported scopes
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes_supported = scopes;
        self
    }

    /// Set the human-readable name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }
}
