//! Provider lookup table, built once at startup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::provider::{CredentialProvider, ProviderError};

/// The closed set of external providers the broker knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Github,
    Google,
}

impl ProviderType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Google => "google",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github" => Ok(Self::Github),
            "google" => Ok(Self::Google),
            other => Err(ProviderError::NotConfigured(other.to_string())),
        }
    }
}

/// Immutable map from provider type to its flow implementation. Providers
/// whose settings are absent at startup simply do not appear; asking for
/// them yields `NotConfigured` rather than a panic.
#[derive(Default)]
pub struct CredentialRegistry {
    providers: HashMap<ProviderType, Arc<dyn CredentialProvider>>,
}

impl CredentialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider_type: ProviderType,
        provider: Arc<dyn CredentialProvider>,
    ) {
        self.providers.insert(provider_type, provider);
    }

    /// # Errors
    /// Returns `NotConfigured` when no provider was registered for the type.
    pub fn get(
        &self,
        provider_type: ProviderType,
    ) -> Result<Arc<dyn CredentialProvider>, ProviderError> {
        self.providers
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(provider_type.to_string()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::cookies::CookieStore;
    use crate::oauth::provider::{
        AuthorizationStart, ProviderAccessToken, TokenOutcome,
    };
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl CredentialProvider for StubProvider {
        async fn generate_auth_url(
            &self,
            _cookies: &mut dyn CookieStore,
        ) -> Result<AuthorizationStart, ProviderError> {
            Ok(AuthorizationStart {
                auth_url: "https://stub.example".to_string(),
                device_code: None,
                interval: None,
                expires_in: None,
                state: None,
            })
        }

        async fn get_token(
            &self,
            _cookies: &mut dyn CookieStore,
            _code: Option<&str>,
            _state: Option<&str>,
        ) -> Result<TokenOutcome, ProviderError> {
            Err(ProviderError::Rejected("stub".to_string()))
        }

        async fn get_access_token(
            &self,
            _cookies: &mut dyn CookieStore,
        ) -> Result<Option<ProviderAccessToken>, ProviderError> {
            Ok(None)
        }
    }

    #[test]
    fn provider_type_roundtrips_through_str() {
        assert_eq!("github".parse::<ProviderType>().ok(), Some(ProviderType::Github));
        assert_eq!("google".parse::<ProviderType>().ok(), Some(ProviderType::Google));
        assert_eq!(ProviderType::Github.as_str(), "github");
        assert!("gitlab".parse::<ProviderType>().is_err());
    }

    #[test]
    fn provider_type_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&ProviderType::Github).expect("json"),
            "\"github\""
        );
        let parsed: ProviderType = serde_json::from_str("\"google\"").expect("json");
        assert_eq!(parsed, ProviderType::Google);
    }

    #[test]
    fn registry_returns_not_configured_for_missing_provider() {
        let mut registry = CredentialRegistry::new();
        assert!(registry.is_empty());
        registry.register(ProviderType::Github, Arc::new(StubProvider));

        assert!(registry.get(ProviderType::Github).is_ok());
        assert!(matches!(
            registry.get(ProviderType::Google),
            Err(ProviderError::NotConfigured(name)) if name == "google"
        ));
    }
}
