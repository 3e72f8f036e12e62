//! OIDC token verification
//!
//! - [`fetch`] - pluggable HTTP fetching
//! - [`jwks`] - discovery and key set caching
//! - [`verifier`] - JWT verification and scope extraction
//!
//! The same verifier handles both OIDC bearer tokens and Cloudflare Access
//! identity assertions; they differ only in [`VerifyOptions`].

pub mod fetch;
pub mod jwks;
pub mod verifier;

pub use fetch::{FetchedJson, HttpFetcher, ReqwestFetcher};
pub use jwks::KeyCache;
pub use verifier::{
    JsonWebTokenVerifier, JwtVerifier, OidcVerifier, VerificationParams, VerifiedToken,
    VerifyOptions, scopes_from_claims,
};

/// Decoded JWT claim set
pub type Claims = serde_json::Map<String, serde_json::Value>;
