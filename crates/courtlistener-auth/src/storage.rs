//! Grant storage
//!
//! Authorization codes, access tokens and refresh tokens are kept behind the
//! [`GrantStore`] trait so that a networked store can replace the in-memory
//! one without touching the authorization server.
//!
//! [`GrantStore::take`] is the linearization point for single-use
//! credentials: exactly one caller observes `Some` for a given key.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AuthResult;
use crate::pkce::CodeChallengeMethod;

/// Pending authorization code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCodeRecord {
    /// Client the code was issued to
    pub client_id: String,
    /// Redirect URI the code was delivered to
    pub redirect_uri: String,
    /// PKCE challenge supplied with the authorization request
    pub code_challenge: String,
    /// PKCE challenge method
    pub code_challenge_method: CodeChallengeMethod,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Issued access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    /// Client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: Vec<String>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Issued refresh token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Client the token was issued to
    pub client_id: String,
    /// Scope ceiling for refreshes
    pub scopes: Vec<String>,
    /// Expiry
    pub expires_at: DateTime<Utc>,
}

/// Everything the authorization server persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GrantRecord {
    /// Authorization code awaiting redemption
    AuthorizationCode(AuthorizationCodeRecord),
    /// Access token
    AccessToken(AccessTokenRecord),
    /// Refresh token
    RefreshToken(RefreshTokenRecord),
}

/// Key/value store for grant records with per-entry TTL
#[async_trait]
pub trait GrantStore: Send + Sync + Debug {
    /// Insert or replace a record
    async fn put(&self, key: &str, record: GrantRecord, ttl: Duration) -> AuthResult<()>;

    /// Read a record without consuming it
    async fn get(&self, key: &str) -> AuthResult<Option<GrantRecord>>;

    /// Atomically read and remove a record
    ///
    /// Concurrent callers racing on the same key: exactly one gets `Some`.
    async fn take(&self, key: &str) -> AuthResult<Option<GrantRecord>>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, key: &str) -> AuthResult<bool>;
}

#[derive(Debug, Clone)]
struct StoredGrant {
    record: GrantRecord,
    expires_at: Instant,
}

impl StoredGrant {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local grant store
///
/// Expired entries are treated as absent on read and dropped lazily;
/// [`InMemoryGrantStore::purge_expired`] sweeps them eagerly.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    entries: DashMap<String, StoredGrant>,
}

impl InMemoryGrantStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "Purged expired grants");
        }
        removed
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn put(&self, key: &str, record: GrantRecord, ttl: Duration) -> AuthResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredGrant {
                record,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> AuthResult<Option<GrantRecord>> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|stored| stored.is_live(now).then(|| stored.record.clone()));

        match live {
            Some(Some(record)) => Ok(Some(record)),
            Some(None) => {
                self.entries.remove_if(key, |_, stored| !stored.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take(&self, key: &str) -> AuthResult<Option<GrantRecord>> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .and_then(|(_, stored)| stored.is_live(now).then_some(stored.record)))
    }

    async fn delete(&self, key: &str) -> AuthResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}
