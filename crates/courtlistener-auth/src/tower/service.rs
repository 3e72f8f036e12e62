//! Tower Service implementation for authentication
//!
//! For each `http::Request<B>` the service:
//!
//! 1. forwards bypassed paths untouched (OAuth endpoints, discovery documents)
//! 2. runs the transport guard (origin, protocol version)
//! 3. runs the dispatcher cascade
//! 4. on success inserts the [`AuthIdentity`] into the request extensions and
//!    calls the inner service; on refusal answers with the rendered [`Denial`]
//!
//! The response body type only needs `From<String>`, which covers
//! `axum::body::Body` and plain `String` bodies in tests.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use tower_service::Service;

use crate::dispatcher::{AuthDispatcher, AuthIdentity, Denial, Verdict};
use crate::guard::TransportGuard;
use crate::request::RequestContext;

use super::AuthLayerConfig;

/// Tower Service that performs the guard and authentication checks
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    dispatcher: Arc<AuthDispatcher>,
    guard: Arc<TransportGuard>,
    config: AuthLayerConfig,
}

impl<S> AuthService<S> {
    /// Create a new auth service
    pub fn new(
        inner: S,
        dispatcher: Arc<AuthDispatcher>,
        guard: Arc<TransportGuard>,
        config: AuthLayerConfig,
    ) -> Self {
        Self {
            inner,
            dispatcher,
            guard,
            config,
        }
    }

    /// Get a reference to the inner service
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the inner service
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

/// Future type for auth service responses
pub type AuthServiceFuture<T, E> = BoxFuture<'static, Result<T, E>>;

impl<S, B, ResBody> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = AuthServiceFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        // The clone may not be ready; keep the one poll_ready was called on
        let inner = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, inner);

        if self.config.should_bypass(req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let (mut parts, body) = req.into_parts();
        let context = RequestContext::from_parts(&parts);

        if let Err(err) = self.guard.check(&context) {
            let denial = Denial::from_guard_error(&err);
            return Box::pin(async move { Ok(denial.into_http_response()) });
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        Box::pin(async move {
            match dispatcher.authorize(&context).await {
                Verdict::Allow(identity) => {
                    if let Some(identity) = identity {
                        parts.extensions.insert::<AuthIdentity>(identity);
                    }
                    inner.call(http::Request::from_parts(parts, body)).await
                }
                Verdict::Deny(denial) => Ok(denial.into_http_response()),
            }
        })
    }
}
