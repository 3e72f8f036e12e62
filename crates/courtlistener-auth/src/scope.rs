//! OAuth scope sets
//!
//! Scopes travel as space-delimited strings on the wire and as ordered,
//! de-duplicated `Vec<String>` inside the crate. A grant is always a subset of
//! the server's closed [`ScopeSet`]; refreshes may only narrow it.

use crate::error::{AuthError, AuthResult};

/// Scopes granted when the configuration does not override them
pub const DEFAULT_SUPPORTED_SCOPES: &[&str] = &["legal:read", "legal:search", "legal:analyze"];

/// Parse a space-delimited scope string, dropping empties and duplicates
pub fn parse_scope(scope: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

/// Join scopes back into their wire form
pub fn format_scope(scopes: &[String]) -> String {
    scopes.join(" ")
}

/// Narrow a granted scope list to the requested scopes
///
/// The result is the intersection of `requested` and `original`, in the
/// order of `original`. It is never a superset of `original`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidScope`] when the intersection is empty.
pub fn narrow(original: &[String], requested: &[String]) -> AuthResult<Vec<String>> {
    let narrowed: Vec<String> = original
        .iter()
        .filter(|s| requested.contains(s))
        .cloned()
        .collect();

    if narrowed.is_empty() {
        return Err(AuthError::InvalidScope(format!(
            "none of '{}' were part of the original grant",
            format_scope(requested)
        )));
    }
    Ok(narrowed)
}

/// The closed set of scopes this server can grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    supported: Vec<String>,
}

impl Default for ScopeSet {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPORTED_SCOPES.iter().map(|s| (*s).to_string()))
    }
}

impl ScopeSet {
    /// Create a scope set from the supported scopes
    pub fn new(scopes: impl IntoIterator<Item = String>) -> Self {
        let mut supported: Vec<String> = Vec::new();
        for scope in scopes {
            if !scope.is_empty() && !supported.contains(&scope) {
                supported.push(scope);
            }
        }
        Self { supported }
    }

    /// All supported scopes
    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    /// Whether `scope` is part of the set
    pub fn contains(&self, scope: &str) -> bool {
        self.supported.iter().any(|s| s == scope)
    }

    /// Compute the granted scopes for an authorization request
    ///
    /// `None` grants the full supported set. Otherwise the grant is the
    /// intersection of the request with the supported set; unrecognized
    /// entries are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidScope`] when scopes were requested but
    /// none of them are supported.
    pub fn grant(&self, requested: Option<&[String]>) -> AuthResult<Vec<String>> {
        let Some(requested) = requested else {
            return Ok(self.supported.clone());
        };

        let granted: Vec<String> = self
            .supported
            .iter()
            .filter(|s| requested.contains(s))
            .cloned()
            .collect();

        if granted.is_empty() {
            return Err(AuthError::InvalidScope(format!(
                "none of '{}' are supported",
                format_scope(requested)
            )));
        }
        Ok(granted)
    }
}
