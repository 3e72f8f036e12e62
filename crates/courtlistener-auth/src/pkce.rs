//! PKCE (RFC 7636) verification
//!
//! The authorization server stores only the challenge. The token endpoint
//! looks it up with `challenge_for_authorization_code` and checks the
//! verifier presented by the client here.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::AuthError;

/// Minimum verifier length (RFC 7636 Section 4.1)
pub const MIN_VERIFIER_LENGTH: usize = 43;
/// Maximum verifier length (RFC 7636 Section 4.1)
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// PKCE transformation applied to the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    /// `challenge == verifier`
    #[serde(rename = "plain")]
    Plain,
    /// `challenge == BASE64URL(SHA256(verifier))`
    #[default]
    #[serde(rename = "S256")]
    S256,
}

impl CodeChallengeMethod {
    /// Wire name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(AuthError::InvalidRequest(format!(
                "unsupported code_challenge_method '{other}'"
            ))),
        }
    }
}

/// Stored PKCE challenge for an authorization code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    /// The challenge string
    pub challenge: String,
    /// How the verifier is transformed before comparison
    pub method: CodeChallengeMethod,
}

/// Compute the S256 challenge for a verifier
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

/// Check a code verifier against a stored challenge
///
/// Verifiers outside the RFC 7636 length bounds or alphabet never match.
pub fn verify_code_verifier(verifier: &str, challenge: &PkceChallenge) -> bool {
    if verifier.len() < MIN_VERIFIER_LENGTH
        || verifier.len() > MAX_VERIFIER_LENGTH
        || !verifier.chars().all(is_unreserved)
    {
        return false;
    }

    let computed = match challenge.method {
        CodeChallengeMethod::Plain => verifier.to_string(),
        CodeChallengeMethod::S256 => s256_challenge(verifier),
    };

    computed
        .as_bytes()
        .ct_eq(challenge.challenge.as_bytes())
        .into()
}
