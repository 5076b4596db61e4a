//! Compact token signing and verification.
//!
//! Tokens are `v1.sign.<base64url(payload || mac)>` where `payload` is the
//! JSON claims and `mac` is an HMAC-SHA256 over `header || payload`. An
//! encrypted variant wraps the whole signed token in an authenticated
//! envelope carried behind the `jwe:` wire prefix.
//!
//! Verification failures are deliberately uniform: a bad signature, an
//! expired token and a malformed token all come back as `None` so callers
//! cannot be used as an oracle.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use ulid::Ulid;
use uuid::Uuid;

use super::crypto;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = "v1.sign.";
const ENCRYPTED_PREFIX: &str = "jwe:";
const ENVELOPE_CONTEXT: &str = "token-envelope:v1";
const MAC_LEN: usize = 32;

/// Claims embedded in every token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    /// Device fingerprint the token is bound to.
    pub fp: String,
    /// Client runs in a PWA/standalone display mode.
    pub pwa: bool,
    /// Client classified as an installed app rather than a browser tab.
    pub installed: bool,
    /// Token id; present on refresh tokens and on access tokens minted
    /// alongside them (the session id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Identity fields the caller provides; the codec fills in timestamps.
#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub sub: Uuid,
    pub fingerprint: String,
    pub pwa: bool,
    pub installed: bool,
}

/// A token on the wire: plain signed, or signed-then-encrypted.
///
/// The wire format keeps the historical `jwe:` prefix for encrypted tokens;
/// in code the two shapes are distinct variants rather than a sniffed string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEnvelope {
    Plain(String),
    Encrypted(String),
}

impl TokenEnvelope {
    /// Parse a wire value into its envelope variant.
    #[must_use]
    pub fn parse(wire: &str) -> Self {
        wire.strip_prefix(ENCRYPTED_PREFIX).map_or_else(
            || Self::Plain(wire.to_string()),
            |inner| Self::Encrypted(inner.to_string()),
        )
    }

    /// Render the wire representation.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Plain(token) => token.clone(),
            Self::Encrypted(sealed) => format!("{ENCRYPTED_PREFIX}{sealed}"),
        }
    }
}

/// Requested token shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenForm {
    Plain,
    Encrypted,
}

/// A freshly signed token and its expiry.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: TokenEnvelope,
    pub exp: i64,
}

/// A freshly signed refresh token: token, expiry, and its generated id.
#[derive(Debug, Clone)]
pub struct SignedRefreshToken {
    pub token: TokenEnvelope,
    pub exp: i64,
    pub jti: String,
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Signs, verifies, encrypts and decrypts compact tokens.
///
/// Holds two independent keys: a signing key for the HMAC and an encryption
/// key for the `jwe:` envelope. Both are validated at construction so `sign`
/// cannot fail at request time for configuration reasons.
#[derive(Clone)]
pub struct TokenCodec {
    signing_key: Vec<u8>,
    encryption_key: [u8; 32],
}

impl TokenCodec {
    /// Build a codec from the operator-supplied secrets.
    ///
    /// # Errors
    /// Returns an error when either secret is empty; missing keys are a
    /// startup misconfiguration, not a runtime condition.
    pub fn new(signing_secret: &str, encryption_secret: &str) -> anyhow::Result<Self> {
        if signing_secret.is_empty() {
            return Err(anyhow::anyhow!("signing secret must not be empty"));
        }
        if encryption_secret.is_empty() {
            return Err(anyhow::anyhow!("encryption secret must not be empty"));
        }
        Ok(Self {
            signing_key: signing_secret.as_bytes().to_vec(),
            encryption_key: crypto::derive_key(encryption_secret),
        })
    }

    /// Sign claims with a `ttl`, optionally carrying a token id, optionally
    /// wrapped in the encrypted envelope.
    pub fn sign(
        &self,
        identity: &TokenIdentity,
        ttl_seconds: i64,
        jti: Option<String>,
        form: TokenForm,
    ) -> SignedToken {
        let iat = unix_now();
        let exp = iat + ttl_seconds;
        let claims = Claims {
            sub: identity.sub,
            fp: identity.fingerprint.clone(),
            pwa: identity.pwa,
            installed: identity.installed,
            jti,
            iat,
            exp,
        };
        let token = self.encode(&claims, form);
        SignedToken { token, exp }
    }

    /// Sign a refresh token with a freshly generated random token id.
    pub fn sign_refresh(
        &self,
        identity: &TokenIdentity,
        ttl_seconds: i64,
        form: TokenForm,
    ) -> SignedRefreshToken {
        let jti = Ulid::new().to_string();
        let signed = self.sign(identity, ttl_seconds, Some(jti.clone()), form);
        SignedRefreshToken {
            token: signed.token,
            exp: signed.exp,
            jti,
        }
    }

    /// Verify a wire token: envelope unwrap, signature, expiry, optional
    /// max-age. Every failure collapses to `None`.
    #[must_use]
    pub fn verify(&self, wire: &str, max_age_seconds: Option<i64>) -> Option<Claims> {
        let signed = self.unwrap_envelope(wire)?;
        let payload = self.verified_payload(&signed)?;
        let claims: Claims = serde_json::from_slice(&payload).ok()?;

        let now = unix_now();
        if claims.exp <= now {
            return None;
        }
        if let Some(max_age) = max_age_seconds {
            if now - claims.iat > max_age {
                return None;
            }
        }
        Some(claims)
    }

    /// Parse claims without verifying the signature or expiry.
    ///
    /// Only for inspecting tokens that are not (or no longer) trusted, such
    /// as extracting the token id from an expired refresh token on logout.
    #[must_use]
    pub fn decode(&self, wire: &str) -> Option<Claims> {
        let signed = self.unwrap_envelope(wire)?;
        let body = signed.strip_prefix(HEADER)?;
        let message = Base64UrlUnpadded::decode_vec(body).ok()?;
        if message.len() < MAC_LEN {
            return None;
        }
        let (payload, _mac) = message.split_at(message.len() - MAC_LEN);
        serde_json::from_slice(payload).ok()
    }

    fn encode(&self, claims: &Claims, form: TokenForm) -> TokenEnvelope {
        // Serialization of a plain struct with string/int fields cannot fail.
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(HEADER.as_bytes());
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        let mut message = Vec::with_capacity(payload.len() + MAC_LEN);
        message.extend_from_slice(&payload);
        message.extend_from_slice(&tag);
        let signed = format!("{HEADER}{}", Base64UrlUnpadded::encode_string(&message));

        match form {
            TokenForm::Plain => TokenEnvelope::Plain(signed),
            TokenForm::Encrypted => {
                match crypto::seal(&self.encryption_key, signed.as_bytes(), ENVELOPE_CONTEXT) {
                    Ok(sealed) => {
                        TokenEnvelope::Encrypted(Base64UrlUnpadded::encode_string(&sealed))
                    }
                    // Sealing a valid key/nonce pair does not fail in
                    // practice; fall back to the signed form rather than
                    // emitting a broken wire value.
                    Err(_) => TokenEnvelope::Plain(signed),
                }
            }
        }
    }

    /// Strip the encryption envelope if present, yielding the signed token.
    fn unwrap_envelope(&self, wire: &str) -> Option<String> {
        match TokenEnvelope::parse(wire) {
            TokenEnvelope::Plain(token) => Some(token),
            TokenEnvelope::Encrypted(sealed) => {
                let data = Base64UrlUnpadded::decode_vec(&sealed).ok()?;
                let plaintext = crypto::open(&self.encryption_key, &data, ENVELOPE_CONTEXT).ok()?;
                String::from_utf8(plaintext).ok()
            }
        }
    }

    /// Check header + MAC and return the raw payload bytes.
    fn verified_payload(&self, signed: &str) -> Option<Vec<u8>> {
        let body = signed.strip_prefix(HEADER)?;
        let message = Base64UrlUnpadded::decode_vec(body).ok()?;
        if message.len() < MAC_LEN {
            return None;
        }
        let (payload, tag) = message.split_at(message.len() - MAC_LEN);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.signing_key)
            .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
        mac.update(HEADER.as_bytes());
        mac.update(payload);
        // Constant-time comparison via the Mac trait.
        mac.verify_slice(tag).ok()?;

        Some(payload.to_vec())
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}
