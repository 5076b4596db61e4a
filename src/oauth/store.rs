//! Encrypted cookie persistence for provider flows.
//!
//! Two values live per provider: the short-lived pending-flow state (PKCE
//! verifier plus device code or CSRF state) and the obtained credential.
//! Both are sealed with the credential cipher before touching the cookie
//! store; plaintext never leaves the process.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::cookies::{CookieOptions, CookieStore, SameSite};
use crate::auth::crypto::CredentialCipher;

use super::provider::Credential;

/// Pending state survives at most this long when the provider does not
/// bound it tighter.
const DEFAULT_PENDING_TTL_SECONDS: i64 = 15 * 60;
/// Credential cookies outlive the access token so the refresh token stays
/// reachable.
const CREDENTIAL_TTL_SECONDS: i64 = 90 * 24 * 60 * 60;

pub(super) struct SealedStore<'a> {
    cipher: &'a CredentialCipher,
    provider_key: &'a str,
    secure: bool,
}

impl<'a> SealedStore<'a> {
    pub(super) fn new(cipher: &'a CredentialCipher, provider_key: &'a str, secure: bool) -> Self {
        Self {
            cipher,
            provider_key,
            secure,
        }
    }

    fn pending_cookie(&self) -> String {
        format!("{}_flow", self.provider_key)
    }

    fn credential_cookie(&self) -> String {
        format!("{}_credential", self.provider_key)
    }

    fn pending_context(&self) -> String {
        format!("flow:v1|{}", self.provider_key)
    }

    fn credential_context(&self) -> String {
        format!("credential:v1|{}", self.provider_key)
    }

    /// Stash pending flow state, bounded by `ttl_seconds` when given.
    pub(super) fn save_pending<T: Serialize>(
        &self,
        cookies: &mut dyn CookieStore,
        state: &T,
        ttl_seconds: Option<i64>,
    ) -> Result<()> {
        let json = serde_json::to_string(state).context("failed to serialize pending state")?;
        let sealed = self.cipher.seal_str(&json, &self.pending_context())?;
        cookies.set(
            &self.pending_cookie(),
            &sealed,
            &CookieOptions::new(ttl_seconds.unwrap_or(DEFAULT_PENDING_TTL_SECONDS))
                .same_site(SameSite::Lax)
                .secure(self.secure),
        );
        Ok(())
    }

    /// Read pending state without consuming it (device flows poll).
    pub(super) fn load_pending<T: DeserializeOwned>(
        &self,
        cookies: &dyn CookieStore,
    ) -> Option<T> {
        let sealed = cookies.get(&self.pending_cookie())?;
        let json = self.cipher.open_str(&sealed, &self.pending_context()).ok()?;
        serde_json::from_str(&json).ok()
    }

    /// Consume pending state once the grant completes.
    pub(super) fn clear_pending(&self, cookies: &mut dyn CookieStore) {
        cookies.delete(&self.pending_cookie());
    }

    pub(super) fn save_credential(
        &self,
        cookies: &mut dyn CookieStore,
        credential: &Credential,
    ) -> Result<()> {
        let json =
            serde_json::to_string(credential).context("failed to serialize credential")?;
        let sealed = self.cipher.seal_str(&json, &self.credential_context())?;
        cookies.set(
            &self.credential_cookie(),
            &sealed,
            &CookieOptions::new(CREDENTIAL_TTL_SECONDS)
                .same_site(SameSite::Lax)
                .secure(self.secure),
        );
        debug!(provider = self.provider_key, "credential stored");
        Ok(())
    }

    pub(super) fn load_credential(&self, cookies: &dyn CookieStore) -> Option<Credential> {
        let sealed = cookies.get(&self.credential_cookie())?;
        let json = self
            .cipher
            .open_str(&sealed, &self.credential_context())
            .ok()?;
        serde_json::from_str(&json).ok()
    }

    pub(super) fn clear_credential(&self, cookies: &mut dyn CookieStore) {
        cookies.delete(&self.credential_cookie());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::RequestCookies;
    use crate::auth::token::unix_now;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Pending {
        verifier: String,
        state: String,
    }

    fn cipher() -> CredentialCipher {
        CredentialCipher::new("encryption-secret")
    }

    #[test]
    fn pending_roundtrip_and_clear() {
        let cipher = cipher();
        let store = SealedStore::new(&cipher, "github", false);
        let mut cookies = RequestCookies::default();

        let pending = Pending {
            verifier: "v".to_string(),
            state: "s".to_string(),
        };
        store.save_pending(&mut cookies, &pending, Some(600)).expect("save");

        // Value on the wire is sealed, not JSON.
        let raw = cookies.get("github_flow").expect("cookie");
        assert!(!raw.contains("verifier"));

        let loaded: Pending = store.load_pending(&cookies).expect("load");
        assert_eq!(loaded, pending);

        store.clear_pending(&mut cookies);
        assert!(store.load_pending::<Pending>(&cookies).is_none());
    }

    #[test]
    fn credential_roundtrip_is_encrypted_and_provider_scoped() {
        let cipher = cipher();
        let mut cookies = RequestCookies::default();
        let credential = Credential {
            access_token: "secret-token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_in: 3600,
            token_type: "bearer".to_string(),
            obtained_at: unix_now(),
            resource_url: None,
            scope: None,
        };

        let github = SealedStore::new(&cipher, "github", false);
        github.save_credential(&mut cookies, &credential).expect("save");
        assert!(!cookies.get("github_credential").expect("cookie").contains("secret-token"));
        assert_eq!(github.load_credential(&cookies), Some(credential.clone()));

        // A different provider's store cannot open the value: the sealed
        // blob is bound to its provider context.
        let mut moved = RequestCookies::default();
        let sealed = cookies.get("github_credential").expect("cookie");
        moved.set("google_credential", &sealed, &CookieOptions::new(60));
        let google = SealedStore::new(&cipher, "google", false);
        assert!(google.load_credential(&moved).is_none());
    }

    #[test]
    fn tampered_cookie_reads_as_absent() {
        let cipher = cipher();
        let store = SealedStore::new(&cipher, "github", false);
        let mut cookies = RequestCookies::default();
        cookies.set("github_credential", "not-a-sealed-value", &CookieOptions::new(60));
        assert!(store.load_credential(&cookies).is_none());
    }
}
