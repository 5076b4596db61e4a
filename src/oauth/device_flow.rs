//! Device-authorization grant (RFC 8628) with PKCE.
//!
//! `generate_auth_url` starts the flow and stashes the device code and
//! verifier in an encrypted cookie; the *caller* drives the poll loop,
//! calling `get_token` until the provider stops answering
//! `authorization_pending`. Refreshes retry transient failures with
//! exponential backoff but abort immediately once the provider says the
//! grant is gone.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::auth::cookies::CookieStore;
use crate::auth::crypto::CredentialCipher;

use super::provider::{
    AuthorizationStart, Credential, CredentialProvider, ProviderAccessToken, ProviderConfig,
    ProviderError, TokenOutcome,
};
use super::store::SealedStore;
use super::{build_http_client, pkce};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
/// Extra refresh attempts after the first, transient failures only.
const REFRESH_RETRIES: u32 = 2;
const BACKOFF_START: Duration = Duration::from_millis(250);

/// Pending flow state carried in the encrypted cookie.
#[derive(Debug, Serialize, Deserialize)]
struct PendingDeviceFlow {
    device_code: String,
    verifier: String,
    expires_in: i64,
}

/// How a token-endpoint error body steers the poll loop.
#[derive(Debug, PartialEq, Eq)]
enum PollClass {
    Pending,
    SlowDown,
    Expired,
    Terminal(String),
}

fn classify_poll_error(error: &str) -> PollClass {
    match error {
        "authorization_pending" => PollClass::Pending,
        "slow_down" => PollClass::SlowDown,
        "expired_token" => PollClass::Expired,
        other => PollClass::Terminal(other.to_string()),
    }
}

fn classify_refresh_error(error: &str) -> ProviderError {
    match error {
        // The provider invalidated the grant; no retry will bring it back.
        "invalid_grant" | "invalid_request" => ProviderError::TokenRevoked,
        other => ProviderError::Rejected(other.to_string()),
    }
}

pub struct DeviceFlowProvider {
    provider_key: String,
    config: ProviderConfig,
    cipher: CredentialCipher,
    client: Client,
    secure_cookies: bool,
}

impl DeviceFlowProvider {
    /// # Errors
    /// Fails when the config lacks a device-authorization endpoint or the
    /// HTTP client cannot be built.
    pub fn new(
        provider_key: &str,
        config: ProviderConfig,
        cipher: CredentialCipher,
        secure_cookies: bool,
    ) -> anyhow::Result<Self> {
        if config.device_code_url.is_none() {
            return Err(anyhow!(
                "provider {provider_key} has no device-authorization endpoint"
            ));
        }
        Ok(Self {
            provider_key: provider_key.to_string(),
            config,
            cipher,
            client: build_http_client()?,
            secure_cookies,
        })
    }

    fn store(&self) -> SealedStore<'_> {
        SealedStore::new(&self.cipher, &self.provider_key, self.secure_cookies)
    }

    #[instrument(skip(self))]
    async fn request_device_authorization(&self, challenge: &str) -> Result<Value, ProviderError> {
        let url = self
            .config
            .device_code_url
            .as_deref()
            .ok_or_else(|| anyhow!("device-authorization endpoint missing"))?;

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", &self.config.scope_string()),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if status.is_server_error() {
            return Err(ProviderError::Transient(format!("{status}")));
        }
        if !status.is_success() {
            let message = body["error"].as_str().unwrap_or("device authorization failed");
            return Err(ProviderError::Rejected(message.to_string()));
        }
        Ok(body)
    }

    #[instrument(skip(self, pending))]
    async fn poll_token_endpoint(
        &self,
        pending: &PendingDeviceFlow,
    ) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("device_code", pending.device_code.as_str()),
                ("grant_type", DEVICE_GRANT_TYPE),
                ("code_verifier", pending.verifier.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(ProviderError::Transient(format!("{}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))
    }

    #[instrument(skip(self, refresh_token))]
    async fn request_refresh(&self, refresh_token: &str) -> Result<Credential, ProviderError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if response.status().is_server_error() {
            return Err(ProviderError::Transient(format!("{}", response.status())));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(e.to_string()))?;

        if let Some(error) = body["error"].as_str() {
            return Err(classify_refresh_error(error));
        }
        Credential::from_token_response(&body).map_err(ProviderError::Internal)
    }

    /// Best-effort account lookup for labeling a fresh credential. Absent
    /// endpoint or any failure yields `None`; the grant already succeeded.
    #[instrument(skip(self, access_token))]
    async fn fetch_user_info(&self, access_token: &str) -> Option<Value> {
        let url = self.config.user_info_url.as_deref()?;
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    /// Refresh with bounded backoff: transient failures get up to
    /// [`REFRESH_RETRIES`] retries; revocations abort on the spot.
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<Credential, ProviderError> {
        let mut delay = BACKOFF_START;
        let mut attempt = 0;
        loop {
            match self.request_refresh(refresh_token).await {
                Ok(credential) => return Ok(credential),
                Err(ProviderError::Transient(message)) if attempt < REFRESH_RETRIES => {
                    attempt += 1;
                    warn!(
                        provider = %self.provider_key,
                        attempt,
                        "transient refresh failure, backing off: {message}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CredentialProvider for DeviceFlowProvider {
    async fn generate_auth_url(
        &self,
        cookies: &mut dyn CookieStore,
    ) -> Result<AuthorizationStart, ProviderError> {
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);

        let body = self.request_device_authorization(&challenge).await?;

        let device_code = body["device_code"]
            .as_str()
            .ok_or_else(|| anyhow!("device authorization response missing device_code"))?
            .to_string();
        let auth_url = body["verification_uri"]
            .as_str()
            .or_else(|| body["verification_url"].as_str())
            .ok_or_else(|| anyhow!("device authorization response missing verification_uri"))?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(900);
        let interval = body["interval"].as_u64().unwrap_or(5);

        self.store()
            .save_pending(
                cookies,
                &PendingDeviceFlow {
                    device_code: device_code.clone(),
                    verifier,
                    expires_in,
                },
                Some(expires_in),
            )
            .context("failed to stash device-flow state")?;

        Ok(AuthorizationStart {
            auth_url,
            device_code: Some(device_code),
            interval: Some(interval),
            expires_in: Some(expires_in),
            state: None,
        })
    }

    async fn get_token(
        &self,
        cookies: &mut dyn CookieStore,
        _code: Option<&str>,
        _state: Option<&str>,
    ) -> Result<TokenOutcome, ProviderError> {
        let store = self.store();
        let pending: PendingDeviceFlow = store
            .load_pending(cookies)
            .ok_or(ProviderError::DeviceCodeExpired)?;

        let body = self.poll_token_endpoint(&pending).await?;

        if let Some(error) = body["error"].as_str() {
            return match classify_poll_error(error) {
                PollClass::Pending => Ok(TokenOutcome::Pending { slow_down: false }),
                PollClass::SlowDown => Ok(TokenOutcome::Pending { slow_down: true }),
                PollClass::Expired => {
                    store.clear_pending(cookies);
                    Err(ProviderError::DeviceCodeExpired)
                }
                PollClass::Terminal(message) => {
                    store.clear_pending(cookies);
                    Err(ProviderError::Rejected(message))
                }
            };
        }

        let credential = Credential::from_token_response(&body)?;
        // Approved: the device verifier is consumed with the pending state.
        store.clear_pending(cookies);
        store.save_credential(cookies, &credential)?;

        if let Some(info) = self.fetch_user_info(&credential.access_token).await {
            let account = info["login"]
                .as_str()
                .or_else(|| info["email"].as_str())
                .unwrap_or("unknown");
            debug!(provider = %self.provider_key, account, "credential issued");
        }

        Ok(TokenOutcome::Issued(credential))
    }

    async fn get_access_token(
        &self,
        cookies: &mut dyn CookieStore,
    ) -> Result<Option<ProviderAccessToken>, ProviderError> {
        let store = self.store();
        let Some(credential) = store.load_credential(cookies) else {
            return Ok(None);
        };

        if credential.is_fresh() {
            return Ok(Some(ProviderAccessToken {
                access_token: credential.access_token,
                endpoint: credential.resource_url,
            }));
        }

        let Some(refresh_token) = credential.refresh_token.clone() else {
            // Stale and unrefreshable; drop it so callers re-authorize.
            store.clear_credential(cookies);
            return Ok(None);
        };

        let rotated = match self.refresh_access_token(&refresh_token).await {
            Ok(rotated) => rotated,
            Err(ProviderError::TokenRevoked) => {
                store.clear_credential(cookies);
                return Err(ProviderError::TokenRevoked);
            }
            Err(err) => return Err(err),
        };

        // Providers may omit the refresh token on rotation; keep the old one.
        let mut updated = rotated;
        if updated.refresh_token.is_none() {
            updated.refresh_token = Some(refresh_token);
        }
        store.save_credential(cookies, &updated)?;

        Ok(Some(ProviderAccessToken {
            access_token: updated.access_token,
            endpoint: updated.resource_url,
        }))
    }
}
