//! `WWW-Authenticate` challenges (RFC 6750 Section 3, RFC 9728 Section 5.1)

/// Realm named in every challenge
pub const REALM: &str = "courtlistener-mcp";

/// Builder for a `Bearer` challenge
///
/// ```rust
/// use courtlistener_auth::challenge::WwwAuthenticateBuilder;
///
/// let header = WwwAuthenticateBuilder::new()
///     .with_error("insufficient_scope", Some("The access token lacks legal:read"))
///     .with_scope("legal:read")
///     .build();
///
/// assert_eq!(
///     header,
///     r#"Bearer realm="courtlistener-mcp", error="insufficient_scope", error_description="The access token lacks legal:read", scope="legal:read""#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WwwAuthenticateBuilder {
    error: Option<String>,
    error_description: Option<String>,
    scope: Option<String>,
    resource_metadata: Option<String>,
}

impl WwwAuthenticateBuilder {
    /// Plain `Bearer realm=...` challenge
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an RFC 6750 error code and optional description
    #[must_use]
    pub fn with_error(mut self, error: &str, description: Option<&str>) -> Self {
        self.error = Some(error.to_string());
        self.error_description = description.map(str::to_string);
        self
    }

    /// Name the scope the request needed
    #[must_use]
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    /// Point at the protected resource metadata document
    #[must_use]
    pub fn with_resource_metadata(mut self, url: Option<&str>) -> Self {
        self.resource_metadata = url.map(str::to_string);
        self
    }

    /// Render the header value
    pub fn build(self) -> String {
        let mut parts = vec![format!("Bearer realm=\"{REALM}\"")];

        let params = [
            ("error", self.error),
            ("error_description", self.error_description),
            ("scope", self.scope),
            ("resource_metadata", self.resource_metadata),
        ];
        for (name, value) in params {
            if let Some(value) = value {
                parts.push(format!("{name}=\"{}\"", quote(&value)));
            }
        }

        parts.join(", ")
    }
}

// quoted-string: escape backslash and double quote, drop control characters
fn quote(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_challenge() {
        assert_eq!(
            WwwAuthenticateBuilder::new().build(),
            "Bearer realm=\"courtlistener-mcp\""
        );
    }

    #[test]
    fn test_invalid_token_with_metadata() {
        let header = WwwAuthenticateBuilder::new()
            .with_error("invalid_token", Some("The access token is invalid or expired"))
            .with_resource_metadata(Some(
                "https://mcp.example.com/.well-known/oauth-protected-resource",
            ))
            .build();
        assert!(header.starts_with("Bearer realm=\"courtlistener-mcp\", error=\"invalid_token\""));
        assert!(header.ends_with(
            "resource_metadata=\"https://mcp.example.com/.well-known/oauth-protected-resource\""
        ));
    }

    #[test]
    fn test_values_are_quoted() {
        let header = WwwAuthenticateBuilder::new()
            .with_error("invalid_request", Some("bad \"value\"\n"))
            .build();
        assert!(header.contains(r#"error_description="bad \"value\"""#));
        assert!(!header.contains('\n'));
    }
}
