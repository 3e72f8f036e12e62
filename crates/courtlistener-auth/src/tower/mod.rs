//! # Tower middleware
//!
//! [`AuthLayer`] wraps an HTTP service so that every request first passes the
//! [`TransportGuard`](crate::guard::TransportGuard) and then the
//! [`AuthDispatcher`](crate::dispatcher::AuthDispatcher). Refused requests
//! never reach the inner service; they are answered with the rendered
//! [`Denial`](crate::dispatcher::Denial).
//!
//! ```rust,ignore
//! use tower::ServiceBuilder;
//! use courtlistener_auth::tower::AuthLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(AuthLayer::new(dispatcher, guard))
//!     .service(mcp_handler);
//! ```
//!
//! ## Request Extensions
//!
//! On success the [`AuthIdentity`](crate::dispatcher::AuthIdentity) is
//! inserted into the request's extensions. Open mode inserts nothing.
//!
//! ```rust,ignore
//! if let Some(identity) = req.extensions().get::<AuthIdentity>() {
//!     println!("Authenticated via {}", identity.scheme);
//! }
//! ```

mod layer;
mod service;

pub use layer::AuthLayer;
pub use service::{AuthService, AuthServiceFuture};

use crate::metadata::{AUTHORIZATION_SERVER_METADATA_PATH, PROTECTED_RESOURCE_METADATA_PATH};

/// Configuration for the auth layer
#[derive(Debug, Clone)]
pub struct AuthLayerConfig {
    /// Paths served without the guard or the dispatcher
    pub bypass_paths: Vec<String>,
    /// Path prefixes served without the guard or the dispatcher
    pub bypass_prefixes: Vec<String>,
}

impl Default for AuthLayerConfig {
    fn default() -> Self {
        Self {
            bypass_paths: ["/authorize", "/token", "/register", "/revoke", "/health"]
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            bypass_prefixes: vec![
                AUTHORIZATION_SERVER_METADATA_PATH.to_string(),
                PROTECTED_RESOURCE_METADATA_PATH.to_string(),
            ],
        }
    }
}

impl AuthLayerConfig {
    /// Configuration that protects every path
    #[must_use]
    pub fn protect_all() -> Self {
        Self {
            bypass_paths: Vec::new(),
            bypass_prefixes: Vec::new(),
        }
    }

    /// Add a path to the bypass list
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.bypass_paths.push(path.into());
        self
    }

    /// Add a path prefix to the bypass list
    #[must_use]
    pub fn bypass_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bypass_prefixes.push(prefix.into());
        self
    }

    /// Check if a path should bypass authentication
    #[must_use]
    pub fn should_bypass(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|p| p == path)
            || self
                .bypass_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthLayerConfig::default();
        assert!(config.should_bypass("/token"));
        assert!(config.should_bypass("/authorize"));
        assert!(config.should_bypass("/.well-known/oauth-authorization-server"));
        assert!(config.should_bypass("/.well-known/oauth-protected-resource/mcp"));
        assert!(!config.should_bypass("/mcp"));
        assert!(!config.should_bypass("/token/extra"));
    }

    #[test]
    fn test_protect_all() {
        let config = AuthLayerConfig::protect_all().bypass_path("/health");
        assert!(config.should_bypass("/health"));
        assert!(!config.should_bypass("/token"));
    }

    #[test]
    fn test_custom_prefix() {
        let config = AuthLayerConfig::protect_all().bypass_prefix("/public/");
        assert!(config.should_bypass("/public/status"));
        assert!(!config.should_bypass("/public"));
    }
}
