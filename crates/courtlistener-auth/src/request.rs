//! Request context
//!
//! The guard and the dispatcher see requests only through [`RequestContext`],
//! built once at the transport boundary. They never touch the transport's own
//! request type.

use std::collections::HashMap;

use http::{HeaderMap, Method, header};

/// Header carrying the negotiated MCP protocol version
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the Cloudflare Access identity assertion
pub const CLOUDFLARE_ASSERTION_HEADER: &str = "cf-access-jwt-assertion";

/// Query parameter accepted as a bearer token when no header is sent
pub const ACCESS_TOKEN_QUERY_PARAM: &str = "access_token";

/// Transport-neutral view of an incoming request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// HTTP method
    pub method: Method,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Decoded query parameters, last value wins
    pub query: HashMap<String, String>,
}

impl RequestContext {
    /// Build a context from the parts of an `http` request
    pub fn from_parts(parts: &http::request::Parts) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            headers: parts.headers.clone(),
            query,
        }
    }

    /// Header value as UTF-8, `None` if absent or not valid text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Bearer token from `Authorization`, else from the `access_token` query parameter
    pub fn bearer_token(&self) -> Option<&str> {
        if let Some(value) = self.header(header::AUTHORIZATION.as_str())
            && let Some((scheme, token)) = value.split_once(' ')
            && scheme.eq_ignore_ascii_case("bearer")
        {
            let token = token.trim();
            return (!token.is_empty()).then_some(token);
        }

        self.query
            .get(ACCESS_TOKEN_QUERY_PARAM)
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    /// `Origin` header
    pub fn origin(&self) -> Option<&str> {
        self.header(header::ORIGIN.as_str())
    }

    /// `MCP-Protocol-Version` header
    pub fn protocol_version(&self) -> Option<&str> {
        self.header(PROTOCOL_VERSION_HEADER)
    }

    /// `Cf-Access-Jwt-Assertion` header
    pub fn cloudflare_assertion(&self) -> Option<&str> {
        self.header(CLOUDFLARE_ASSERTION_HEADER)
            .filter(|v| !v.is_empty())
    }
}
