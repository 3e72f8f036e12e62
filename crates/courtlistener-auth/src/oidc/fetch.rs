//! Pluggable HTTP fetching for discovery documents and key sets

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AuthError, AuthResult};

/// Default request timeout for discovery and key set fetches
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A fetched JSON document
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedJson {
    /// HTTP status code
    pub status: u16,
    /// Parsed body, `Null` when the body was not JSON
    pub body: serde_json::Value,
}

impl FetchedJson {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches JSON over HTTP
///
/// Implementations report transport failures as [`AuthError::Fetch`] and
/// hand back every HTTP response, successful or not.
#[async_trait]
pub trait HttpFetcher: Send + Sync + Debug {
    /// GET `url` and parse the body as JSON
    async fn get_json(&self, url: &str) -> AuthResult<FetchedJson>;
}

/// [`HttpFetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Create a fetcher with [`DEFAULT_FETCH_TIMEOUT`]
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the HTTP client cannot be built.
    pub fn new() -> AuthResult<Self> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher with a custom request timeout
    ///
    /// Redirects are not followed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("courtlistener-auth/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get_json(&self, url: &str) -> AuthResult<FetchedJson> {
        debug!(url = %url, "Fetching JSON document");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| AuthError::Fetch {
            url: url.to_string(),
            reason: format!("reading body: {e}"),
        })?;
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        Ok(FetchedJson { status, body })
    }
}
