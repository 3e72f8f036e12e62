//! Client Registry (RFC 7591 dynamic client registration)
//!
//! Clients register themselves with a [`ClientMetadata`] document and get back
//! a [`RegisteredClient`] carrying a server-generated `client_id` and, for
//! confidential clients, a freshly minted `client_secret`.
//!
//! Registrations are immutable and live for the lifetime of the process.
//! There is no update or delete.
//!
//! # Example
//!
//! ```rust
//! use courtlistener_auth::registry::{ClientMetadata, ClientRegistry};
//!
//! let registry = ClientRegistry::new();
//! let client = registry
//!     .register_client(ClientMetadata::mcp_client(
//!         "Research Assistant",
//!         "http://localhost:3000/callback",
//!     ))
//!     .unwrap();
//!
//! assert!(client.client_secret.is_some());
//! assert!(registry.get_client(&client.client_id).is_some());
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::secret::{generate_token, secrets_match};

/// Grant types a client may register for
pub const SUPPORTED_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];
/// Response types a client may register for
pub const SUPPORTED_RESPONSE_TYPES: &[&str] = &["code"];

/// How a client authenticates at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// Public client, no secret
    None,
    /// Secret in the form body
    ClientSecretPost,
    /// Secret in an HTTP Basic `Authorization` header
    #[default]
    ClientSecretBasic,
}

impl TokenEndpointAuthMethod {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretPost => "client_secret_post",
            Self::ClientSecretBasic => "client_secret_basic",
        }
    }

    /// Whether clients using this method hold a secret
    pub fn is_confidential(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenEndpointAuthMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "client_secret_post" => Ok(Self::ClientSecretPost),
            "client_secret_basic" => Ok(Self::ClientSecretBasic),
            other => Err(AuthError::InvalidClientMetadata(format!(
                "unsupported token_endpoint_auth_method '{other}'"
            ))),
        }
    }
}

/// Client registration request (RFC 7591 Section 2)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    /// Redirect URIs, at least one required
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Token endpoint authentication method, `client_secret_basic` when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,

    /// Grant types, `authorization_code refresh_token` when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,

    /// Response types, `code` when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types: Option<Vec<String>>,

    /// Space-delimited default scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Human-readable client name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Client homepage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,

    /// Client logo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,

    /// Contact addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<String>>,

    /// Terms of service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,

    /// Privacy policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,

    /// Software identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,

    /// Software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

impl ClientMetadata {
    /// Metadata for a typical MCP client: one redirect URI, authorization code
    /// plus refresh token grants, `client_secret_basic`
    pub fn mcp_client(client_name: &str, redirect_uri: &str) -> Self {
        Self {
            client_name: Some(client_name.to_string()),
            redirect_uris: vec![redirect_uri.to_string()],
            ..Self::default()
        }
    }

    /// Register as a public client (no secret)
    #[must_use]
    pub fn public(mut self) -> Self {
        self.token_endpoint_auth_method = Some(TokenEndpointAuthMethod::None.to_string());
        self
    }

    /// Set the default scopes
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Add another redirect URI
    #[must_use]
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uris.push(redirect_uri.into());
        self
    }
}

/// A registered client (RFC 7591 Section 3.2 response)
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Server-generated identifier
    pub client_id: String,

    /// Secret, present only for confidential clients
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Registration time, seconds since the epoch
    pub client_id_issued_at: i64,

    /// Secret expiry; `0` means the secret never expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,

    /// Exact-match redirect URIs
    pub redirect_uris: Vec<String>,

    /// Token endpoint authentication method
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,

    /// Allowed grant types
    pub grant_types: Vec<String>,

    /// Allowed response types
    pub response_types: Vec<String>,

    /// Space-delimited default scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Human-readable client name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Client homepage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,

    /// Client logo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,

    /// Contact addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<String>>,

    /// Terms of service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,

    /// Privacy policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,

    /// Software identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,

    /// Software version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

impl fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uris", &self.redirect_uris)
            .field("token_endpoint_auth_method", &self.token_endpoint_auth_method)
            .field("grant_types", &self.grant_types)
            .field("client_name", &self.client_name)
            .finish_non_exhaustive()
    }
}

impl RegisteredClient {
    /// Whether `redirect_uri` is one of the registered URIs (exact match)
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    /// Whether the client registered for `grant_type`
    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

fn validate_redirect_uri(uri: &str) -> AuthResult<()> {
    let parsed = Url::parse(uri).map_err(|e| {
        AuthError::InvalidClientMetadata(format!("redirect URI '{uri}' is not absolute: {e}"))
    })?;

    if parsed.fragment().is_some() {
        return Err(AuthError::InvalidClientMetadata(format!(
            "redirect URI '{uri}' must not contain a fragment"
        )));
    }
    Ok(())
}

fn validate_subset(field: &str, values: &[String], supported: &[&str]) -> AuthResult<()> {
    if values.is_empty() {
        return Err(AuthError::InvalidClientMetadata(format!(
            "{field} must not be empty"
        )));
    }
    if let Some(unsupported) = values.iter().find(|v| !supported.contains(&v.as_str())) {
        return Err(AuthError::InvalidClientMetadata(format!(
            "unsupported {field} entry '{unsupported}'"
        )));
    }
    Ok(())
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// In-process registry of OAuth clients
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client has registered yet
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Validate metadata and register a new client
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidClientMetadata`] when there is no redirect
    /// URI, a redirect URI is relative or carries a fragment, or an
    /// unsupported auth method, grant type or response type is requested.
    pub fn register_client(&self, metadata: ClientMetadata) -> AuthResult<RegisteredClient> {
        if metadata.redirect_uris.is_empty() {
            warn!("Client registration rejected: no redirect URIs");
            return Err(AuthError::InvalidClientMetadata(
                "at least one redirect URI is required".to_string(),
            ));
        }
        for uri in &metadata.redirect_uris {
            validate_redirect_uri(uri)?;
        }

        let auth_method = metadata
            .token_endpoint_auth_method
            .as_deref()
            .map(str::parse::<TokenEndpointAuthMethod>)
            .transpose()?
            .unwrap_or_default();

        let grant_types = metadata
            .grant_types
            .unwrap_or_else(|| owned(SUPPORTED_GRANT_TYPES));
        validate_subset("grant_types", &grant_types, SUPPORTED_GRANT_TYPES)?;

        let response_types = metadata
            .response_types
            .unwrap_or_else(|| owned(SUPPORTED_RESPONSE_TYPES));
        validate_subset("response_types", &response_types, SUPPORTED_RESPONSE_TYPES)?;

        let client_id = Uuid::new_v4().to_string();
        let client_secret = auth_method.is_confidential().then(generate_token);

        let client = RegisteredClient {
            client_id: client_id.clone(),
            client_secret_expires_at: client_secret.as_ref().map(|_| 0),
            client_secret,
            client_id_issued_at: Utc::now().timestamp(),
            redirect_uris: metadata.redirect_uris,
            token_endpoint_auth_method: auth_method,
            grant_types,
            response_types,
            scope: metadata.scope,
            client_name: metadata.client_name,
            client_uri: metadata.client_uri,
            logo_uri: metadata.logo_uri,
            contacts: metadata.contacts,
            tos_uri: metadata.tos_uri,
            policy_uri: metadata.policy_uri,
            software_id: metadata.software_id,
            software_version: metadata.software_version,
        };

        self.clients.insert(client_id.clone(), client.clone());
        info!(
            client_id = %client_id,
            auth_method = %auth_method,
            redirect_uris = client.redirect_uris.len(),
            "Registered OAuth client"
        );
        Ok(client)
    }

    /// Look up a client by id
    pub fn get_client(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.get(client_id).map(|entry| entry.value().clone())
    }

    /// Authenticate a client at the token endpoint
    ///
    /// Public clients are accepted on their id alone. Confidential clients
    /// must present their secret; it is compared in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidClient`] for unknown clients and missing or
    /// wrong secrets.
    pub fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> AuthResult<RegisteredClient> {
        let Some(client) = self.get_client(client_id) else {
            debug!(client_id = %client_id, "Unknown client");
            return Err(AuthError::InvalidClient);
        };

        let Some(expected) = client.client_secret.as_deref() else {
            return Ok(client);
        };

        match client_secret {
            Some(provided) if secrets_match(provided, expected) => Ok(client),
            Some(_) => {
                warn!(client_id = %client_id, "Client secret mismatch");
                Err(AuthError::InvalidClient)
            }
            None => {
                debug!(client_id = %client_id, "Confidential client presented no secret");
                Err(AuthError::InvalidClient)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "http://localhost:3000/callback";

    #[test]
    fn test_register_confidential_client_gets_secret() {
        let registry = ClientRegistry::new();
        let client = registry
            .register_client(ClientMetadata::mcp_client("App", CALLBACK))
            .unwrap();

        assert!(client.client_secret.is_some());
        assert_eq!(client.client_secret_expires_at, Some(0));
        assert_eq!(
            client.token_endpoint_auth_method,
            TokenEndpointAuthMethod::ClientSecretBasic
        );
        assert_eq!(client.grant_types, owned(SUPPORTED_GRANT_TYPES));
        assert_eq!(client.response_types, vec!["code".to_string()]);
        assert_eq!(registry.get_client(&client.client_id), Some(client));
    }

    #[test]
    fn test_register_public_client_has_no_secret() {
        let registry = ClientRegistry::new();
        let client = registry
            .register_client(ClientMetadata::mcp_client("CLI", CALLBACK).public())
            .unwrap();

        assert!(client.client_secret.is_none());
        assert!(client.client_secret_expires_at.is_none());
        let json = serde_json::to_value(&client).unwrap();
        assert!(json.get("client_secret").is_none());
        assert_eq!(json["token_endpoint_auth_method"], "none");
    }

    #[test]
    fn test_client_ids_are_unique() {
        let registry = ClientRegistry::new();
        let a = registry
            .register_client(ClientMetadata::mcp_client("A", CALLBACK))
            .unwrap();
        let b = registry
            .register_client(ClientMetadata::mcp_client("B", CALLBACK))
            .unwrap();
        assert_ne!(a.client_id, b.client_id);
        assert_ne!(a.client_secret, b.client_secret);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rejects_missing_redirect_uris() {
        let registry = ClientRegistry::new();
        let err = registry
            .register_client(ClientMetadata::default())
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidClientMetadata(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_relative_and_fragment_redirects() {
        let registry = ClientRegistry::new();
        for uri in ["/callback", "https://app.example.com/cb#frag"] {
            let err = registry
                .register_client(ClientMetadata::mcp_client("App", uri))
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidClientMetadata(_)), "{uri}");
        }
    }

    #[test]
    fn test_rejects_unsupported_grant_type() {
        let registry = ClientRegistry::new();
        let mut metadata = ClientMetadata::mcp_client("App", CALLBACK);
        metadata.grant_types = Some(vec!["client_credentials".to_string()]);
        assert!(matches!(
            registry.register_client(metadata),
            Err(AuthError::InvalidClientMetadata(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_auth_method() {
        let registry = ClientRegistry::new();
        let mut metadata = ClientMetadata::mcp_client("App", CALLBACK);
        metadata.token_endpoint_auth_method = Some("private_key_jwt".to_string());
        assert!(matches!(
            registry.register_client(metadata),
            Err(AuthError::InvalidClientMetadata(_))
        ));
    }

    #[test]
    fn test_get_unknown_client() {
        let registry = ClientRegistry::new();
        assert!(registry.get_client("does-not-exist").is_none());
    }

    #[test]
    fn test_authenticate_client() {
        let registry = ClientRegistry::new();
        let confidential = registry
            .register_client(ClientMetadata::mcp_client("App", CALLBACK))
            .unwrap();
        let secret = confidential.client_secret.clone().unwrap();

        assert!(
            registry
                .authenticate_client(&confidential.client_id, Some(&secret))
                .is_ok()
        );
        assert_eq!(
            registry
                .authenticate_client(&confidential.client_id, Some("wrong"))
                .unwrap_err(),
            AuthError::InvalidClient
        );
        assert_eq!(
            registry
                .authenticate_client(&confidential.client_id, None)
                .unwrap_err(),
            AuthError::InvalidClient
        );

        let public = registry
            .register_client(ClientMetadata::mcp_client("CLI", CALLBACK).public())
            .unwrap();
        assert!(registry.authenticate_client(&public.client_id, None).is_ok());
        assert_eq!(
            registry.authenticate_client("nope", None).unwrap_err(),
            AuthError::InvalidClient
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let registry = ClientRegistry::new();
        let client = registry
            .register_client(ClientMetadata::mcp_client("App", CALLBACK))
            .unwrap();
        let secret = client.client_secret.clone().unwrap();
        assert!(!format!("{client:?}").contains(&secret));
    }
}
