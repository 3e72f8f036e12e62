//! Discovery and key set caching
//!
//! Two caches sit in front of the [`HttpFetcher`]:
//!
//! - issuer → `jwks_uri`, filled from `{issuer}/.well-known/openid-configuration`
//! - `jwks_uri` → [`JwkSet`]
//!
//! Entries live for the cache TTL (10 minutes by default) and are then
//! refetched. Each entry is replaced wholesale, so concurrent readers see
//! either the old or the new value, never a mix.
//!
//! A token signed with a key the cached set does not contain triggers a
//! forced refetch, at most once per `min_refresh_interval` per key set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use tracing::{debug, info, warn};

use super::fetch::HttpFetcher;
use crate::error::{AuthError, AuthResult};

/// Default lifetime of discovery and key set entries
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default minimum spacing between forced key set refreshes
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// Shared cache of discovered key set URLs and fetched key sets
#[derive(Debug)]
pub struct KeyCache {
    fetcher: Arc<dyn HttpFetcher>,
    ttl: Duration,
    min_refresh_interval: Duration,
    jwks_uris: DashMap<String, Cached<String>>,
    key_sets: DashMap<String, Cached<Arc<JwkSet>>>,
}

impl KeyCache {
    /// Create a cache with the default TTL and refresh interval
    pub fn new(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            fetcher,
            ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            jwks_uris: DashMap::new(),
            key_sets: DashMap::new(),
        }
    }

    /// Override the entry lifetime
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Override the forced refresh interval
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Entry lifetime
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve the key set URL for an issuer through OIDC discovery
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Discovery`] naming the issuer when the discovery
    /// document cannot be fetched, answers with a non-2xx status, or has no
    /// `jwks_uri`.
    pub async fn jwks_uri_for_issuer(&self, issuer: &str) -> AuthResult<String> {
        if let Some(uri) = self.cached_jwks_uri(issuer) {
            debug!(issuer = %issuer, "Using cached jwks_uri");
            return Ok(uri);
        }

        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let discovery_error = |reason: String| {
            warn!(issuer = %issuer, reason = %reason, "OIDC discovery failed");
            AuthError::Discovery {
                issuer: issuer.to_string(),
                reason,
            }
        };

        let document = self
            .fetcher
            .get_json(&discovery_url)
            .await
            .map_err(|e| discovery_error(e.to_string()))?;

        if !document.is_success() {
            return Err(discovery_error(format!(
                "{discovery_url} returned status {}",
                document.status
            )));
        }

        let jwks_uri = document
            .body
            .get("jwks_uri")
            .and_then(serde_json::Value::as_str)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| discovery_error("discovery document has no jwks_uri".to_string()))?
            .to_string();

        info!(issuer = %issuer, jwks_uri = %jwks_uri, "Discovered jwks_uri");
        self.jwks_uris
            .insert(issuer.to_string(), Cached::new(jwks_uri.clone()));
        Ok(jwks_uri)
    }

    /// Key set for a URL, from cache when fresh
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Fetch`] when the key set cannot be fetched or
    /// parsed.
    pub async fn key_set(&self, jwks_uri: &str) -> AuthResult<Arc<JwkSet>> {
        if let Some(keys) = self.cached_key_set(jwks_uri) {
            debug!(jwks_uri = %jwks_uri, "Using cached JWKS");
            return Ok(keys);
        }
        self.fetch_key_set(jwks_uri).await
    }

    /// Refetch a key set, ignoring the cache
    ///
    /// Returns `Ok(None)` when the set was refreshed less than
    /// `min_refresh_interval` ago.
    ///
    /// # Errors
    ///
    /// Same as [`KeyCache::key_set`].
    pub async fn refresh_key_set(&self, jwks_uri: &str) -> AuthResult<Option<Arc<JwkSet>>> {
        let recently_fetched = self
            .key_sets
            .get(jwks_uri)
            .is_some_and(|entry| entry.fetched_at.elapsed() < self.min_refresh_interval);
        if recently_fetched {
            warn!(jwks_uri = %jwks_uri, "JWKS refresh rate limited");
            return Ok(None);
        }
        self.fetch_key_set(jwks_uri).await.map(Some)
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.jwks_uris.clear();
        self.key_sets.clear();
        debug!("Key cache cleared");
    }

    fn cached_jwks_uri(&self, issuer: &str) -> Option<String> {
        self.jwks_uris
            .get(issuer)
            .and_then(|entry| entry.fresh(self.ttl))
    }

    fn cached_key_set(&self, jwks_uri: &str) -> Option<Arc<JwkSet>> {
        self.key_sets
            .get(jwks_uri)
            .and_then(|entry| entry.fresh(self.ttl))
    }

    async fn fetch_key_set(&self, jwks_uri: &str) -> AuthResult<Arc<JwkSet>> {
        info!(jwks_uri = %jwks_uri, "Fetching JWKS");

        let fetch_error = |reason: String| {
            warn!(jwks_uri = %jwks_uri, reason = %reason, "JWKS fetch failed");
            AuthError::Fetch {
                url: jwks_uri.to_string(),
                reason,
            }
        };

        let document = self.fetcher.get_json(jwks_uri).await?;
        if !document.is_success() {
            return Err(fetch_error(format!("status {}", document.status)));
        }

        let keys: JwkSet = serde_json::from_value(document.body)
            .map_err(|e| fetch_error(format!("invalid JWKS: {e}")))?;
        let keys = Arc::new(keys);

        info!(jwks_uri = %jwks_uri, key_count = keys.keys.len(), "Fetched JWKS");
        self.key_sets
            .insert(jwks_uri.to_string(), Cached::new(Arc::clone(&keys)));
        Ok(keys)
    }
}
