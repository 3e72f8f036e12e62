//! Transport guard
//!
//! Cheap checks that run before any credential is inspected:
//!
//! - **Origin**: with a non-empty allow-list, `Origin` must equal one of the
//!   entries exactly. A missing header is rejected too. This is the DNS
//!   rebinding defence for browser-reachable deployments.
//! - **Protocol version**: a present `MCP-Protocol-Version` must name a
//!   supported version. In strict mode the header is mandatory.

use std::collections::HashSet;

use tracing::debug;

use crate::config::GuardSettings;
use crate::error::{AuthError, AuthResult};
use crate::request::RequestContext;

/// Origin and protocol-version checks
#[derive(Debug, Clone)]
pub struct TransportGuard {
    allowed_origins: HashSet<String>,
    strict_protocol_version: bool,
    supported_versions: Vec<String>,
}

impl Default for TransportGuard {
    fn default() -> Self {
        Self::new(&GuardSettings::default())
    }
}

impl TransportGuard {
    /// Build a guard from settings
    pub fn new(settings: &GuardSettings) -> Self {
        Self {
            allowed_origins: settings.allowed_origins.iter().cloned().collect(),
            strict_protocol_version: settings.strict_protocol_version,
            supported_versions: settings.supported_protocol_versions.clone(),
        }
    }

    /// Check a request
    ///
    /// # Errors
    ///
    /// - [`AuthError::DisallowedOrigin`] (403) for an origin off the allow-list
    /// - [`AuthError::MissingProtocolVersion`] (400) in strict mode without the header
    /// - [`AuthError::UnsupportedProtocolVersion`] (400) naming the rejected value
    pub fn check(&self, request: &RequestContext) -> AuthResult<()> {
        self.check_origin(request)?;
        self.check_protocol_version(request)
    }

    fn check_origin(&self, request: &RequestContext) -> AuthResult<()> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }

        match request.origin() {
            Some(origin) if self.allowed_origins.contains(origin) => Ok(()),
            Some(origin) => {
                debug!(origin = %origin, path = %request.path, "Rejected origin");
                Err(AuthError::DisallowedOrigin(origin.to_string()))
            }
            None => {
                debug!(path = %request.path, "Rejected request without Origin");
                Err(AuthError::DisallowedOrigin("<missing>".to_string()))
            }
        }
    }

    fn check_protocol_version(&self, request: &RequestContext) -> AuthResult<()> {
        match request.protocol_version() {
            Some(version) if self.supported_versions.iter().any(|v| v == version) => Ok(()),
            Some(version) => {
                debug!(version = %version, "Rejected protocol version");
                Err(AuthError::UnsupportedProtocolVersion(version.to_string()))
            }
            None if self.strict_protocol_version => Err(AuthError::MissingProtocolVersion),
            None => Ok(()),
        }
    }
}
