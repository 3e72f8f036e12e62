//! Tower Layer implementation for authentication

use std::sync::Arc;

use tower::Layer;

use crate::dispatcher::AuthDispatcher;
use crate::guard::TransportGuard;

use super::AuthLayerConfig;
use super::service::AuthService;

/// Tower Layer that adds the transport guard and authentication to services
///
/// ```rust,ignore
/// use tower::ServiceBuilder;
/// use courtlistener_auth::tower::AuthLayer;
///
/// let service = ServiceBuilder::new()
///     .layer(AuthLayer::new(dispatcher, guard))
///     .service(my_inner_service);
/// ```
#[derive(Debug, Clone)]
pub struct AuthLayer {
    dispatcher: Arc<AuthDispatcher>,
    guard: Arc<TransportGuard>,
    config: AuthLayerConfig,
}

impl AuthLayer {
    /// Create a new auth layer with default configuration
    pub fn new(dispatcher: AuthDispatcher, guard: TransportGuard) -> Self {
        Self::from_arc(Arc::new(dispatcher), guard)
    }

    /// Create a new auth layer from a shared dispatcher
    pub fn from_arc(dispatcher: Arc<AuthDispatcher>, guard: TransportGuard) -> Self {
        Self {
            dispatcher,
            guard: Arc::new(guard),
            config: AuthLayerConfig::default(),
        }
    }

    /// Set the configuration for this layer
    #[must_use]
    pub fn config(mut self, config: AuthLayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a path that bypasses authentication
    #[must_use]
    pub fn bypass_path(mut self, path: impl Into<String>) -> Self {
        self.config.bypass_paths.push(path.into());
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService::new(
            inner,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.guard),
            self.config.clone(),
        )
    }
}
