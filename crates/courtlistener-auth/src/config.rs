//! Authorization configuration
//!
//! [`AuthConfig`] is built once at startup, usually with
//! [`AuthConfig::from_env`], and then shared by reference. Nothing in the
//! crate reads the environment after that.
//!
//! Which sections are present decides which authentication scheme the
//! dispatcher runs; see [`crate::dispatcher`].
//!
//! # Environment variables
//!
//! | Variable | Meaning |
//! |---|---|
//! | `OIDC_ISSUER_URL` | Enables OIDC bearer verification |
//! | `OIDC_AUDIENCE` | Expected `aud` claim |
//! | `OIDC_JWKS_URL` | Skip discovery and use this key set |
//! | `OIDC_REQUIRED_SCOPE` | Scope every token must carry |
//! | `CF_ACCESS_TEAM_DOMAIN`, `CF_ACCESS_AUD` | Cloudflare Access assertion verification |
//! | `SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY` | Service-role API key lookups |
//! | `SUPABASE_API_KEYS_TABLE` | Key table, `api_keys` by default |
//! | `MCP_AUTH_TOKEN` | Static bearer token |
//! | `MCP_ALLOW_STATIC_TOKEN_FALLBACK` | Accept the static token when a stronger scheme fails |
//! | `MCP_ALLOWED_ORIGINS` | Comma-separated origin allow-list |
//! | `MCP_STRICT_PROTOCOL_VERSION` | Require `MCP-Protocol-Version` |
//! | `MCP_SUPPORTED_PROTOCOL_VERSIONS` | Space or comma separated versions |
//! | `MCP_AUTH_TIMEOUT_MS` | Per-request verification deadline |
//! | `MCP_RESOURCE_METADATA_URL` | Advertised in `WWW-Authenticate` |
//! | `OAUTH_ISSUER_URL` | Authorization server issuer |
//! | `OAUTH_SUPPORTED_SCOPES` | Space-delimited scope set |
//! | `OAUTH_CODE_TTL_SECS`, `OAUTH_ACCESS_TOKEN_TTL_SECS`, `OAUTH_REFRESH_TOKEN_TTL_SECS` | Grant lifetimes |

use std::time::Duration;

use secrecy::SecretString;
use tracing::debug;
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::scope::{DEFAULT_SUPPORTED_SCOPES, parse_scope};

/// Protocol versions accepted when the configuration does not override them
pub const DEFAULT_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Default per-request verification deadline
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default authorization code lifetime
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(600);

/// Default access token lifetime
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Default refresh token lifetime
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Default Supabase table holding hashed API keys
pub const DEFAULT_API_KEYS_TABLE: &str = "api_keys";

/// OIDC bearer verification settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcSettings {
    /// Expected `iss` claim, also the discovery base
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: Option<String>,
    /// Explicit key set URL, bypassing discovery
    pub jwks_url: Option<String>,
    /// Scope every token must carry
    pub required_scope: Option<String>,
}

impl OidcSettings {
    /// Settings for `issuer` with nothing else configured
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: None,
            jwks_url: None,
            required_scope: None,
        }
    }

    /// Require an audience
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Use an explicit key set URL
    #[must_use]
    pub fn with_jwks_url(mut self, jwks_url: impl Into<String>) -> Self {
        self.jwks_url = Some(jwks_url.into());
        self
    }

    /// Require a scope
    #[must_use]
    pub fn with_required_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }
}

/// Cloudflare Access identity assertion settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudflareAccessSettings {
    /// Team domain, e.g. `acme.cloudflareaccess.com`
    pub team_domain: String,
    /// Application AUD tag
    pub audience: String,
}

impl CloudflareAccessSettings {
    /// Create settings for a team domain and application AUD tag
    pub fn new(team_domain: impl Into<String>, audience: impl Into<String>) -> Self {
        let team_domain: String = team_domain.into();
        let team_domain = team_domain
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();
        Self {
            team_domain,
            audience: audience.into(),
        }
    }

    /// Issuer of Access assertions
    pub fn issuer(&self) -> String {
        format!("https://{}", self.team_domain)
    }

    /// Where Access publishes its signing keys
    pub fn jwks_url(&self) -> String {
        format!("https://{}/cdn-cgi/access/certs", self.team_domain)
    }
}

/// Service-role key store settings
#[derive(Debug, Clone)]
pub struct ServiceKeySettings {
    /// Supabase project URL
    pub url: String,
    /// Service-role key used to query the key table
    pub service_role_key: SecretString,
    /// Table holding hashed keys
    pub table: String,
}

/// Transport guard settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSettings {
    /// Exact-match `Origin` allow-list, empty allows any origin
    pub allowed_origins: Vec<String>,
    /// Require `MCP-Protocol-Version` on every request
    pub strict_protocol_version: bool,
    /// Accepted protocol versions
    pub supported_protocol_versions: Vec<String>,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            strict_protocol_version: false,
            supported_protocol_versions: DEFAULT_PROTOCOL_VERSIONS
                .iter()
                .map(|v| (*v).to_string())
                .collect(),
        }
    }
}

/// Authorization server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationServerSettings {
    /// Issuer advertised in RFC 8414 metadata
    pub issuer_url: String,
    /// Closed set of grantable scopes
    pub supported_scopes: Vec<String>,
    /// Authorization code lifetime
    pub code_ttl: Duration,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
}

impl Default for AuthorizationServerSettings {
    fn default() -> Self {
        Self {
            issuer_url: "http://localhost:8080".to_string(),
            supported_scopes: DEFAULT_SUPPORTED_SCOPES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            code_ttl: DEFAULT_CODE_TTL,
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
        }
    }
}

/// Complete authorization configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OIDC bearer verification
    pub oidc: Option<OidcSettings>,
    /// Cloudflare Access assertion verification
    pub cloudflare_access: Option<CloudflareAccessSettings>,
    /// Service-role API key lookups
    pub service_keys: Option<ServiceKeySettings>,
    /// Static bearer token
    pub static_token: Option<SecretString>,
    /// Accept the static token when a stronger scheme rejects a request
    pub allow_static_fallback: bool,
    /// Transport guard
    pub guard: GuardSettings,
    /// Per-request verification deadline
    pub verification_timeout: Duration,
    /// Protected resource metadata URL for `WWW-Authenticate`
    pub resource_metadata_url: Option<String>,
    /// Authorization server
    pub authorization_server: AuthorizationServerSettings,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oidc: None,
            cloudflare_access: None,
            service_keys: None,
            static_token: None,
            allow_static_fallback: false,
            guard: GuardSettings::default(),
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
            resource_metadata_url: None,
            authorization_server: AuthorizationServerSettings::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// See [`AuthConfig::from_lookup`].
    pub fn from_env() -> AuthResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] for non-boolean flags, non-numeric
    /// durations, malformed URLs, and half-configured Supabase or Cloudflare
    /// Access pairs.
    pub fn from_lookup<F>(lookup: F) -> AuthResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let oidc = match get("OIDC_ISSUER_URL") {
            Some(issuer) => {
                parse_url("OIDC_ISSUER_URL", &issuer)?;
                if let Some(jwks) = get("OIDC_JWKS_URL") {
                    parse_url("OIDC_JWKS_URL", &jwks)?;
                }
                Some(OidcSettings {
                    issuer,
                    audience: get("OIDC_AUDIENCE"),
                    jwks_url: get("OIDC_JWKS_URL"),
                    required_scope: get("OIDC_REQUIRED_SCOPE"),
                })
            }
            None => None,
        };

        let cloudflare_access = match (get("CF_ACCESS_TEAM_DOMAIN"), get("CF_ACCESS_AUD")) {
            (Some(team_domain), Some(audience)) => {
                Some(CloudflareAccessSettings::new(team_domain, audience))
            }
            (None, None) => None,
            _ => {
                return Err(AuthError::Config(
                    "CF_ACCESS_TEAM_DOMAIN and CF_ACCESS_AUD must be set together".to_string(),
                ));
            }
        };

        let service_keys = match (get("SUPABASE_URL"), get("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(key)) => {
                parse_url("SUPABASE_URL", &url)?;
                Some(ServiceKeySettings {
                    url: url.trim_end_matches('/').to_string(),
                    service_role_key: SecretString::new(key),
                    table: get("SUPABASE_API_KEYS_TABLE")
                        .unwrap_or_else(|| DEFAULT_API_KEYS_TABLE.to_string()),
                })
            }
            (None, None) => None,
            _ => {
                return Err(AuthError::Config(
                    "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together".to_string(),
                ));
            }
        };

        let mut guard = GuardSettings {
            allowed_origins: get("MCP_ALLOWED_ORIGINS")
                .map(|origins| split_list(&origins))
                .unwrap_or_default(),
            strict_protocol_version: parse_flag(
                "MCP_STRICT_PROTOCOL_VERSION",
                get("MCP_STRICT_PROTOCOL_VERSION"),
            )?,
            ..GuardSettings::default()
        };
        if let Some(versions) = get("MCP_SUPPORTED_PROTOCOL_VERSIONS") {
            guard.supported_protocol_versions = split_list(&versions);
        }

        let mut authorization_server = AuthorizationServerSettings::default();
        if let Some(issuer) = get("OAUTH_ISSUER_URL") {
            parse_url("OAUTH_ISSUER_URL", &issuer)?;
            authorization_server.issuer_url = issuer.trim_end_matches('/').to_string();
        }
        if let Some(scopes) = get("OAUTH_SUPPORTED_SCOPES") {
            authorization_server.supported_scopes = parse_scope(&scopes);
        }
        if let Some(ttl) = parse_duration_secs("OAUTH_CODE_TTL_SECS", get("OAUTH_CODE_TTL_SECS"))? {
            authorization_server.code_ttl = ttl;
        }
        if let Some(ttl) = parse_duration_secs(
            "OAUTH_ACCESS_TOKEN_TTL_SECS",
            get("OAUTH_ACCESS_TOKEN_TTL_SECS"),
        )? {
            authorization_server.access_token_ttl = ttl;
        }
        if let Some(ttl) = parse_duration_secs(
            "OAUTH_REFRESH_TOKEN_TTL_SECS",
            get("OAUTH_REFRESH_TOKEN_TTL_SECS"),
        )? {
            authorization_server.refresh_token_ttl = ttl;
        }

        let verification_timeout = match get("MCP_AUTH_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(parse_number("MCP_AUTH_TIMEOUT_MS", &ms)?),
            None => DEFAULT_VERIFICATION_TIMEOUT,
        };

        let config = Self {
            oidc,
            cloudflare_access,
            service_keys,
            static_token: get("MCP_AUTH_TOKEN").map(SecretString::new),
            allow_static_fallback: parse_flag(
                "MCP_ALLOW_STATIC_TOKEN_FALLBACK",
                get("MCP_ALLOW_STATIC_TOKEN_FALLBACK"),
            )?,
            guard,
            verification_timeout,
            resource_metadata_url: get("MCP_RESOURCE_METADATA_URL"),
            authorization_server,
        };

        debug!(
            oidc = config.oidc.is_some(),
            cloudflare_access = config.cloudflare_access.is_some(),
            service_keys = config.service_keys.is_some(),
            static_token = config.static_token.is_some(),
            allow_static_fallback = config.allow_static_fallback,
            allowed_origins = config.guard.allowed_origins.len(),
            "Loaded authorization configuration"
        );
        Ok(config)
    }

    /// Whether any authentication scheme is configured
    pub fn has_any_scheme(&self) -> bool {
        self.oidc.is_some()
            || self.cloudflare_access.is_some()
            || self.service_keys.is_some()
            || self.static_token.is_some()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_url(name: &str, value: &str) -> AuthResult<Url> {
    Url::parse(value).map_err(|e| AuthError::Config(format!("{name} is not a valid URL: {e}")))
}

fn parse_flag(name: &str, value: Option<String>) -> AuthResult<bool> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(AuthError::Config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_number(name: &str, value: &str) -> AuthResult<u64> {
    value
        .parse::<u64>()
        .map_err(|_| AuthError::Config(format!("{name} must be a whole number, got '{value}'")))
}

fn parse_duration_secs(name: &str, value: Option<String>) -> AuthResult<Option<Duration>> {
    value
        .map(|v| parse_number(name, &v).map(Duration::from_secs))
        .transpose()
}
