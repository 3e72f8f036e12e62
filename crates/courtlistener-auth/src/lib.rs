//! # CourtListener Auth
//!
//! Authorization layer for the CourtListener legal-research MCP server: an
//! OAuth 2.1 authorization server for MCP clients, and per-request
//! authentication across several credential schemes.
//!
//! ## Architecture
//!
//! - [`registry`] - Dynamic client registration (RFC 7591)
//! - [`authorization_server`] - Authorization code + PKCE, refresh rotation, revocation
//! - [`storage`] - Grant store trait and the in-memory implementation
//! - [`oidc`] - OIDC discovery, JWKS caching and JWT verification
//! - [`service_keys`] - Service-role API keys looked up in Supabase
//! - [`dispatcher`] - The per-request authentication cascade
//! - [`guard`] - Origin allow-list and protocol-version checks
//! - [`config`] - Environment-driven configuration
//! - [`tower`] - Tower middleware running the guard and the dispatcher
//! - [`http`] - axum router for the OAuth endpoints and discovery documents
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courtlistener_auth::{AuthConfig, AuthDispatcher, AuthorizationServer, ClientRegistry};
//! use courtlistener_auth::guard::TransportGuard;
//! use courtlistener_auth::http::{OAuthState, oauth_router};
//! use courtlistener_auth::tower::AuthLayer;
//!
//! # fn main() -> Result<(), courtlistener_auth::AuthError> {
//! let config = AuthConfig::from_env()?;
//! let server = AuthorizationServer::in_memory(config.authorization_server.clone());
//!
//! let dispatcher = AuthDispatcher::from_config(&config)?
//!     .with_authorization_server(server.clone());
//! let auth_layer = AuthLayer::new(dispatcher, TransportGuard::new(&config.guard));
//!
//! let oauth = oauth_router(OAuthState::new(Arc::new(ClientRegistry::new()), server));
//! let app: axum::Router = axum::Router::new()
//!     .route("/mcp", axum::routing::post(|| async { "ok" }))
//!     .layer(auth_layer)
//!     .merge(oauth);
//! # let _ = app;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` (default) - Tower [`AuthLayer`](crate::tower::AuthLayer)
//! - `http-endpoints` (default) - axum OAuth router
//! - `full` - Everything
//!
//! ## Standards Compliance
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 6750** - Bearer Token Usage
//! - **RFC 7009** - Token Revocation
//! - **RFC 7591** - Dynamic Client Registration
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 8414** - Authorization Server Metadata
//! - **RFC 9728** - OAuth 2.0 Protected Resource Metadata

#![cfg_attr(docsrs, feature(doc_cfg))]

// Submodules
pub mod authorization_server;
pub mod challenge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod metadata;
pub mod oidc;
pub mod pkce;
pub mod registry;
pub mod request;
pub mod scope;
pub mod secret;
pub mod service_keys;
pub mod storage;

#[cfg(feature = "http-endpoints")]
#[cfg_attr(docsrs, doc(cfg(feature = "http-endpoints")))]
pub mod http;

#[cfg(feature = "middleware")]
#[cfg_attr(docsrs, doc(cfg(feature = "middleware")))]
pub mod tower;

#[doc(inline)]
pub use authorization_server::{AuthInfo, AuthorizationParams, AuthorizationServer, TokenResponse};

#[doc(inline)]
pub use config::AuthConfig;

#[doc(inline)]
pub use dispatcher::{AuthDispatcher, AuthIdentity, AuthScheme, Denial, Verdict};

#[doc(inline)]
pub use error::{AuthError, AuthResult};

#[doc(inline)]
pub use registry::{ClientMetadata, ClientRegistry, RegisteredClient};

#[doc(inline)]
pub use request::RequestContext;
