//! PKCE and state parameters for OAuth2 grants.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Generates a cryptographically random code verifier.
///
/// Returns a 64-character URL-safe string (RFC 7636 requires 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 48];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Computes the S256 code challenge: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&hash)
}

/// Generates a random `state` parameter (16 bytes, base64url).
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}
