//! Secret comparison and token material
//!
//! Presented credentials (client secrets, the static bearer token) are never
//! compared with `==`. Both sides are hashed with BLAKE3 first so the
//! comparison runs over fixed-length digests, then compared with
//! [`subtle::ConstantTimeEq`]. Hashing also hides the length of the
//! expected value.
//!
//! Opaque tokens and client secrets are 32 random bytes encoded as
//! unpadded URL-safe base64.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Random bytes behind every minted token or secret
pub const TOKEN_BYTES: usize = 32;

fn digest(value: &str) -> [u8; 32] {
    *blake3::hash(value.as_bytes()).as_bytes()
}

/// Compare a presented secret with the expected one in constant time
///
/// Empty inputs never match.
///
/// # Example
///
/// ```rust
/// use courtlistener_auth::secret::secrets_match;
///
/// assert!(secrets_match("s3cret-value", "s3cret-value"));
/// assert!(!secrets_match("s3cret-valuE", "s3cret-value"));
/// assert!(!secrets_match("", ""));
/// ```
#[must_use]
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    if provided.is_empty() || expected.is_empty() {
        return false;
    }
    digest(provided).ct_eq(&digest(expected)).into()
}

/// Mint an opaque random token
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
