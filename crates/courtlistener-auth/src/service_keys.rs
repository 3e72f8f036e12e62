//! Service-role API key lookups
//!
//! API keys are stored hashed (SHA-256, hex) in a Supabase table. A presented
//! key is hashed and looked up through PostgREST with the service-role key:
//!
//! ```text
//! GET {url}/rest/v1/{table}?key_hash=eq.{sha256}&revoked=is.false&select=id,user_id,scopes&limit=1
//! apikey: {service_role_key}
//! Authorization: Bearer {service_role_key}
//! ```
//!
//! The plaintext key never leaves the process.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::config::ServiceKeySettings;
use crate::error::{AuthError, AuthResult};
use crate::scope::parse_scope;

/// Identity behind a service-role API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceKeyIdentity {
    /// Row id of the key
    pub key_id: String,
    /// Owning user, when recorded
    pub user_id: Option<String>,
    /// Scopes granted to the key
    pub scopes: Vec<String>,
}

/// Looks up API keys
#[async_trait]
pub trait ServiceKeyStore: Send + Sync + Debug {
    /// Resolve a presented key
    ///
    /// `Ok(None)` means the key is unknown or revoked.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyStore`] when the store cannot answer.
    async fn lookup(&self, key: &str) -> AuthResult<Option<ServiceKeyIdentity>>;
}

/// Hex SHA-256 of a key, the form stored in the key table
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scopes_from_row(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => parse_scope(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// [`ServiceKeyStore`] backed by Supabase PostgREST
#[derive(Debug, Clone)]
pub struct SupabaseKeyStore {
    client: reqwest::Client,
    settings: ServiceKeySettings,
}

impl SupabaseKeyStore {
    /// Create a store with a 5 second request timeout
    ///
    /// # Errors
    ///
    /// [`AuthError::Config`] if the HTTP client cannot be built.
    pub fn new(settings: ServiceKeySettings) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    fn lookup_url(&self, key_hash: &str) -> AuthResult<Url> {
        let mut url = Url::parse(&format!(
            "{}/rest/v1/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.table
        ))
        .map_err(|e| AuthError::Config(format!("invalid Supabase URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("key_hash", &format!("eq.{key_hash}"))
            .append_pair("revoked", "is.false")
            .append_pair("select", "id,user_id,scopes")
            .append_pair("limit", "1");
        Ok(url)
    }
}

#[async_trait]
impl ServiceKeyStore for SupabaseKeyStore {
    async fn lookup(&self, key: &str) -> AuthResult<Option<ServiceKeyIdentity>> {
        let url = self.lookup_url(&hash_key(key))?;
        let service_role_key = self.settings.service_role_key.expose_secret();

        let response = self
            .client
            .get(url)
            .header("apikey", service_role_key.as_str())
            .bearer_auth(service_role_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Service key lookup request failed");
                AuthError::KeyStore(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, table = %self.settings.table, "Service key lookup rejected");
            return Err(AuthError::KeyStore(format!("key store returned status {status}")));
        }

        let rows: Vec<Value> = response.json().await.map_err(|e| {
            warn!(error = %e, "Service key lookup returned malformed JSON");
            AuthError::KeyStore(format!("malformed response: {e}"))
        })?;

        let Some(row) = rows.first() else {
            debug!("Service key not found");
            return Ok(None);
        };

        let key_id = row
            .get("id")
            .and_then(value_to_string)
            .ok_or_else(|| AuthError::KeyStore("key row has no id".to_string()))?;

        debug!(key_id = %key_id, "Service key resolved");
        Ok(Some(ServiceKeyIdentity {
            key_id,
            user_id: row.get("user_id").and_then(value_to_string),
            scopes: scopes_from_row(row.get("scopes")),
        }))
    }
}
