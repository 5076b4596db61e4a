//! Shared types and the capability contract for external identity
//! providers.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::cookies::CookieStore;
use crate::auth::token::unix_now;

/// Freshness buffer: a credential expiring within this window counts as
/// stale so callers never hand out a token about to die mid-request.
pub const EXPIRY_BUFFER_SECONDS: i64 = 30;

/// Tokens obtained from a provider. Stored encrypted via the cookie store,
/// mutated in place on refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: String,
    /// Unix seconds at which the credential was obtained or last refreshed.
    pub obtained_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Credential {
    /// True while the access token has more than the safety buffer left.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.obtained_at + self.expires_in - EXPIRY_BUFFER_SECONDS > unix_now()
    }

    /// Build a credential from a token-endpoint JSON body, stamping
    /// `obtained_at`. Providers report lifetime either as `expires_in`
    /// seconds or as an absolute `expires_at` timestamp; both are accepted.
    ///
    /// # Errors
    /// Returns an error when the body carries no `access_token`.
    pub fn from_token_response(body: &serde_json::Value) -> anyhow::Result<Self> {
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("token response missing access_token"))?
            .to_string();

        let now = unix_now();
        let expires_in = body["expires_in"].as_i64().unwrap_or_else(|| {
            body["expires_at"]
                .as_i64()
                .map_or(DEFAULT_EXPIRES_IN_SECONDS, |at| at - now)
        });

        Ok(Self {
            access_token,
            refresh_token: body["refresh_token"].as_str().map(str::to_string),
            expires_in,
            token_type: body["token_type"].as_str().unwrap_or("bearer").to_string(),
            obtained_at: now,
            resource_url: body["resource_url"]
                .as_str()
                .or_else(|| body["resource"].as_str())
                .map(str::to_string),
            scope: body["scope"].as_str().map(str::to_string),
        })
    }
}

/// Assumed lifetime when a provider omits both expiry fields.
const DEFAULT_EXPIRES_IN_SECONDS: i64 = 3600;

/// Static per-provider descriptor, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: Option<SecretString>,
    pub scopes: Vec<String>,
    pub token_url: String,
    pub device_code_url: Option<String>,
    pub auth_url: Option<String>,
    pub user_info_url: Option<String>,
    pub redirect_uri: Option<String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

/// What `generate_auth_url` hands back to the caller driving the flow.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationStart {
    pub auth_url: String,
    /// Device-flow only: code the caller polls with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
    /// Device-flow only: seconds between polls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Device-flow only: seconds until the device code dies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Auth-code flow only: CSRF state echoed on the redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Token-endpoint outcome. `Pending`/`SlowDown` are flow control for the
/// polling caller, not failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Issued(Credential),
    Pending { slow_down: bool },
}

/// A usable access token plus the API endpoint it targets, if the provider
/// scoped one.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAccessToken {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider explicitly invalidated the grant; retrying is pointless.
    #[error("provider credential revoked")]
    TokenRevoked,
    #[error("device authorization expired")]
    DeviceCodeExpired,
    /// Network failure or 5xx; safe to retry with backoff.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// Provider rejected the request for a non-retryable reason.
    #[error("provider rejected request: {0}")]
    Rejected(String),
    #[error("provider type not configured: {0}")]
    NotConfigured(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Capability interface every provider variant implements.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Start the grant: PKCE material is generated and stashed in an
    /// encrypted short-lived cookie; the caller gets the URL (and polling
    /// parameters for device flows).
    async fn generate_auth_url(
        &self,
        cookies: &mut dyn CookieStore,
    ) -> Result<AuthorizationStart, ProviderError>;

    /// Complete the grant. Device flows read their device code from the
    /// pending cookie and ignore `code`/`state`; auth-code flows require
    /// both.
    async fn get_token(
        &self,
        cookies: &mut dyn CookieStore,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<TokenOutcome, ProviderError>;

    /// Return a usable access token, refreshing the stored credential if it
    /// has gone stale. `None` when no credential is stored.
    async fn get_access_token(
        &self,
        cookies: &mut dyn CookieStore,
    ) -> Result<Option<ProviderAccessToken>, ProviderError>;
}
