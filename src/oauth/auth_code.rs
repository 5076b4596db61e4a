//! Authorization-code grant with PKCE and CSRF state.
//!
//! `generate_auth_url` builds the redirect URL and stashes the verifier
//! plus state in an encrypted cookie; `get_token` validates the echoed
//! state before exchanging the code. Offline access is always requested
//! so a refresh token comes back with the first exchange.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::auth::cookies::CookieStore;
use crate::auth::crypto::CredentialCipher;

use super::provider::{
    AuthorizationStart, Credential, CredentialProvider, ProviderAccessToken, ProviderConfig,
    ProviderError, TokenOutcome,
};
use super::store::SealedStore;
use super::{build_http_client, pkce};

/// Pending flow state carried in the encrypted cookie.
#[derive(Debug, Serialize, Deserialize)]
struct PendingAuthCode {
    verifier: String,
    state: String,
}

pub struct AuthCodeProvider {
    provider_key: String,
    config: ProviderConfig,
    cipher: CredentialCipher,
    client: Client,
    secure_cookies: bool,
}

impl AuthCodeProvider {
    /// # Errors
    /// Fails when the config lacks an authorization endpoint, a redirect
    /// URI, or a client secret, or when the HTTP client cannot be built.
    pub fn new(
        provider_key: &str,
        config: ProviderConfig,
        cipher: CredentialCipher,
        secure_cookies: bool,
    ) -> anyhow::Result<Self> {
        if config.auth_url.is_none() {
            return Err(anyhow!(
                "provider {provider_key} has no authorization endpoint"
            ));
        }
        if config.redirect_uri.is_none() {
            return Err(anyhow!("provider {provider_key} has no redirect URI"));
        }
        if config.client_secret.is_none() {
            return Err(anyhow!("provider {provider_key} has no client secret"));
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

    fn build_authorization_url(&self, challenge: &str, state: &str) -> anyhow::Result<String> {
        let base = self
            .config
            .auth_url
            .as_deref()
            .ok_or_else(|| anyhow!("authorization endpoint missing"))?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .ok_or_else(|| anyhow!("redirect URI missing"))?;

        let mut url = Url::parse(base).context("invalid authorization endpoint")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scope_string())
            .append_pair("state", state)
            .append_pair("code_challenge", challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        Ok(url.into())
    }

    #[instrument(skip(self, code, verifier))]
    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Value, ProviderError> {
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or_else(|| anyhow!("client secret missing"))?;
        let redirect_uri = self
            .config
            .redirect_uri
            .as_deref()
            .ok_or_else(|| anyhow!("redirect URI missing"))?;

        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
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
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .ok_or_else(|| anyhow!("client secret missing"))?;

        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
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
            return match error {
                "invalid_grant" | "invalid_request" => Err(ProviderError::TokenRevoked),
                other => Err(ProviderError::Rejected(other.to_string())),
            };
        }
        Credential::from_token_response(&body).map_err(ProviderError::Internal)
    }
}

#[async_trait]
impl CredentialProvider for AuthCodeProvider {
    async fn generate_auth_url(
        &self,
        cookies: &mut dyn CookieStore,
    ) -> Result<AuthorizationStart, ProviderError> {
        let verifier = pkce::generate_code_verifier();
        let challenge = pkce::generate_code_challenge(&verifier);
        let state = pkce::generate_state();

        let auth_url = self.build_authorization_url(&challenge, &state)?;

        self.store()
            .save_pending(
                cookies,
                &PendingAuthCode {
                    verifier,
                    state: state.clone(),
                },
                None,
            )
            .context("failed to stash auth-code state")?;

        Ok(AuthorizationStart {
            auth_url,
            device_code: None,
            interval: None,
            expires_in: None,
            state: Some(state),
        })
    }

    async fn get_token(
        &self,
        cookies: &mut dyn CookieStore,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<TokenOutcome, ProviderError> {
        let store = self.store();
        let pending: PendingAuthCode = store
            .load_pending(cookies)
            .ok_or_else(|| ProviderError::Rejected("no authorization in progress".to_string()))?;

        let code =
            code.ok_or_else(|| ProviderError::Rejected("missing authorization code".to_string()))?;
        let state =
            state.ok_or_else(|| ProviderError::Rejected("missing state parameter".to_string()))?;

        // CSRF check before the code ever leaves the process.
        if state != pending.state {
            store.clear_pending(cookies);
            return Err(ProviderError::Rejected("state mismatch".to_string()));
        }

        let body = self.exchange_code(code, &pending.verifier).await?;
        if let Some(error) = body["error"].as_str() {
            store.clear_pending(cookies);
            return Err(ProviderError::Rejected(error.to_string()));
        }

        let credential = Credential::from_token_response(&body)?;
        store.clear_pending(cookies);
        store.save_credential(cookies, &credential)?;
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
            store.clear_credential(cookies);
            return Ok(None);
        };

        let rotated = match self.request_refresh(&refresh_token).await {
            Ok(rotated) => rotated,
            Err(ProviderError::TokenRevoked) => {
                store.clear_credential(cookies);
                return Err(ProviderError::TokenRevoked);
            }
            Err(err) => return Err(err),
        };

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::RequestCookies;
    use secrecy::SecretString;

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "client".to_string(),
            client_secret: Some(SecretString::from("secret".to_string())),
            scopes: vec!["openid".to_string(), "email".to_string()],
            token_url: "https://provider.example/token".to_string(),
            device_code_url: None,
            auth_url: Some("https://provider.example/authorize".to_string()),
            user_info_url: None,
            redirect_uri: Some("https://app.example/callback".to_string()),
        }
    }

    fn provider() -> AuthCodeProvider {
        AuthCodeProvider::new("google", config(), CredentialCipher::new("secret"), false)
            .expect("provider")
    }

    #[test]
    fn constructor_requires_auth_endpoint_and_secret() {
        let mut missing_auth = config();
        missing_auth.auth_url = None;
        assert!(AuthCodeProvider::new(
            "google",
            missing_auth,
            CredentialCipher::new("secret"),
            false
        )
        .is_err());

        let mut missing_secret = config();
        missing_secret.client_secret = None;
        assert!(AuthCodeProvider::new(
            "google",
            missing_secret,
            CredentialCipher::new("secret"),
            false
        )
        .is_err());
    }

    #[test]
    fn authorization_url_carries_pkce_and_offline_access() {
        let url = provider()
            .build_authorization_url("challenge-value", "state-value")
            .expect("url");
        let parsed = Url::parse(&url).expect("parse");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client");
        assert_eq!(pairs["scope"], "openid email");
        assert_eq!(pairs["state"], "state-value");
        assert_eq!(pairs["code_challenge"], "challenge-value");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["access_type"], "offline");
    }

    #[tokio::test]
    async fn generate_auth_url_stashes_matching_state() {
        let provider = provider();
        let mut cookies = RequestCookies::default();
        let start = provider
            .generate_auth_url(&mut cookies)
            .await
            .expect("start");

        let state = start.state.expect("state");
        let pending: PendingAuthCode = provider
            .store()
            .load_pending(&cookies)
            .expect("pending cookie");
        assert_eq!(pending.state, state);
        assert!(start.auth_url.contains(&format!("state={state}")));
        assert!(start.device_code.is_none());
    }

    #[tokio::test]
    async fn get_token_rejects_state_mismatch() {
        let provider = provider();
        let mut cookies = RequestCookies::default();
        provider
            .generate_auth_url(&mut cookies)
            .await
            .expect("start");

        let result = provider
            .get_token(&mut cookies, Some("code"), Some("forged-state"))
            .await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        // The pending state is consumed on mismatch.
        assert!(provider
            .store()
            .load_pending::<PendingAuthCode>(&cookies)
            .is_none());
    }

    #[tokio::test]
    async fn get_token_without_pending_flow_is_rejected() {
        let provider = provider();
        let mut cookies = RequestCookies::default();
        let result = provider
            .get_token(&mut cookies, Some("code"), Some("state"))
            .await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
    }
}
