//! Credential side of the broker: OAuth2 grants against external
//! providers, with PKCE everywhere and encrypted cookie persistence.

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;

pub mod auth_code;
pub mod device_flow;
pub mod pkce;
pub mod provider;
pub mod registry;

mod store;

pub use auth_code::AuthCodeProvider;
pub use device_flow::DeviceFlowProvider;
pub use provider::{
    AuthorizationStart, Credential, CredentialProvider, ProviderAccessToken, ProviderConfig,
    ProviderError, TokenOutcome,
};
pub use registry::{CredentialRegistry, ProviderType};

/// Shared reqwest client shape for provider endpoints.
fn build_http_client() -> anyhow::Result<Client> {
    Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")
}
