//! # Bidello (Session & Credential Broker)
//!
//! `bidello` issues, verifies, rotates and revokes the authentication tokens
//! of the school platform, and manages the token lifecycle of the external
//! OAuth2 identity providers used by the chat/agent layer.
//!
//! ## Sessions
//!
//! Logins mint a short-lived access token and a rotating refresh token, both
//! bound to a device fingerprint. Refresh tokens are single-use: every refresh
//! revokes the presented token id and mints a replacement, so a replayed
//! refresh token is rejected against the [`auth::RevocationStore`].
//!
//! - **Device binding:** browser clients require an exact fingerprint match on
//!   refresh; installed-app clients tolerate bounded drift (viewport changes,
//!   WebView updates) but the drift is logged.
//! - **Brute force:** failed logins are throttled per identifier; five
//!   failures lock the identifier for fifteen minutes.
//! - **Uniform failures:** login errors never reveal whether the identifier
//!   exists.
//!
//! ## Provider credentials
//!
//! External provider access goes through a closed [`oauth::ProviderType`]
//! registry. Device-authorization and PKCE authorization-code grants are
//! supported; obtained credentials are stored encrypted, never in plaintext.

pub mod api;
pub mod auth;
pub mod cli;
pub mod oauth;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
