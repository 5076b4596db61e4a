//! Symmetric encryption for tokens and stored provider credentials.
//!
//! Everything persisted outside the process (cookies, encrypted token
//! envelopes) goes through this module. Output layout is
//! `nonce (12 bytes) || ciphertext`, with a caller-supplied context string
//! bound as AAD so ciphertexts cannot be swapped between uses.

use anyhow::{anyhow, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Derive a fixed-size cipher key from an operator-supplied secret.
///
/// Secrets come from the environment and have no length guarantee; hashing
/// gives the cipher the 32 bytes it needs.
#[must_use]
pub fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

/// Encrypts `plaintext` under `key`, binding `context` as AAD.
/// Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails.
pub fn seal(key: &[u8; 32], plaintext: &[u8], context: &str) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: context.as_bytes(),
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(nonce_bytes.len() + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypts `data` (`nonce || ciphertext`) under `key` and `context`.
///
/// # Errors
/// Returns an error if the data is too short, was tampered with, or was
/// sealed under a different context.
pub fn open(key: &[u8; 32], data: &[u8], context: &str) -> Result<Vec<u8>> {
    if data.len() < 12 {
        return Err(anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let payload = Payload {
        msg: ciphertext,
        aad: context.as_bytes(),
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow!("Decryption failure: {e}"))
}

/// Cipher for values stored via the cookie store.
///
/// Ciphertexts are base64url-encoded so they survive cookie transport.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; 32],
}

impl CredentialCipher {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: derive_key(secret),
        }
    }

    /// Encrypt a string for cookie storage.
    ///
    /// # Errors
    /// Returns an error if encryption fails.
    pub fn seal_str(&self, plaintext: &str, context: &str) -> Result<String> {
        let sealed = seal(&self.key, plaintext.as_bytes(), context)?;
        Ok(Base64UrlUnpadded::encode_string(&sealed))
    }

    /// Decrypt a cookie value back into the original string.
    ///
    /// # Errors
    /// Returns an error on invalid base64, tampering, or context mismatch.
    pub fn open_str(&self, sealed: &str, context: &str) -> Result<String> {
        let data =
            Base64UrlUnpadded::decode_vec(sealed).map_err(|_| anyhow!("Invalid base64url"))?;
        let plaintext = open(&self.key, &data, context)?;
        String::from_utf8(plaintext).map_err(|_| anyhow!("Decrypted value is not utf-8"))
    }

    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}
