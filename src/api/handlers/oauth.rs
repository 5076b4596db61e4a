use super::{provider_error_response, with_cookies};
use crate::auth::RequestCookies;
use crate::oauth::{CredentialRegistry, ProviderError, ProviderType, TokenOutcome};
use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Debug)]
pub struct AuthUrlResponse {
    pub auth_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct TokenRequest {
    /// Authorization code, auth-code flow only.
    pub code: Option<String>,
    /// CSRF state echoed by the provider, auth-code flow only.
    pub state: Option<String>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct TokenStatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_down: Option<bool>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn parse_provider(provider: &str) -> Result<ProviderType, ProviderError> {
    provider.parse()
}

#[utoipa::path(
    get,
    path= "/v1/credentials/{provider}/url",
    params(
        ("provider" = String, Path, description = "Provider name: github or google")
    ),
    responses (
        (status = 200, description = "Authorization started, flow state set as cookie", body = [AuthUrlResponse]),
        (status = 404, description = "Provider not configured")
    ),
    tag= "credentials"
)]
// axum handler for starting a provider authorization
pub async fn auth_url(
    registry: Extension<Arc<CredentialRegistry>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);

    let result = async {
        let provider = registry.get(parse_provider(&provider)?)?;
        provider.generate_auth_url(&mut cookies).await
    }
    .await;

    match result {
        Ok(start) => with_cookies(
            &cookies,
            Json(AuthUrlResponse {
                auth_url: start.auth_url,
                device_code: start.device_code,
                interval: start.interval,
                expires_in: start.expires_in,
                state: start.state,
            })
            .into_response(),
        ),
        Err(err) => provider_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/credentials/{provider}/token",
    params(
        ("provider" = String, Path, description = "Provider name: github or google")
    ),
    request_body = TokenRequest,
    responses (
        (status = 200, description = "Credential issued or authorization still pending", body = [TokenStatusResponse]),
        (status = 400, description = "Provider rejected the grant"),
        (status = 404, description = "Provider not configured"),
        (status = 410, description = "Device authorization expired")
    ),
    tag= "credentials"
)]
// axum handler for completing a provider authorization
pub async fn token(
    registry: Extension<Arc<CredentialRegistry>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TokenRequest>,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);

    let result = async {
        let provider = registry.get(parse_provider(&provider)?)?;
        provider
            .get_token(&mut cookies, request.code.as_deref(), request.state.as_deref())
            .await
    }
    .await;

    match result {
        Ok(TokenOutcome::Issued(_)) => with_cookies(
            &cookies,
            Json(TokenStatusResponse {
                status: "issued",
                slow_down: None,
            })
            .into_response(),
        ),
        Ok(TokenOutcome::Pending { slow_down }) => with_cookies(
            &cookies,
            Json(TokenStatusResponse {
                status: "pending",
                slow_down: Some(slow_down),
            })
            .into_response(),
        ),
        Err(err) => with_cookies(&cookies, provider_error_response(&err)),
    }
}

#[utoipa::path(
    get,
    path= "/v1/credentials/{provider}/access-token",
    params(
        ("provider" = String, Path, description = "Provider name: github or google")
    ),
    responses (
        (status = 200, description = "Usable access token, refreshed if stale", body = [AccessTokenResponse]),
        (status = 204, description = "No credential stored"),
        (status = 401, description = "Stored credential revoked by the provider"),
        (status = 404, description = "Provider not configured")
    ),
    tag= "credentials"
)]
// axum handler for reading a provider access token
pub async fn access_token(
    registry: Extension<Arc<CredentialRegistry>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);

    let result = async {
        let provider = registry.get(parse_provider(&provider)?)?;
        provider.get_access_token(&mut cookies).await
    }
    .await;

    match result {
        Ok(Some(token)) => with_cookies(
            &cookies,
            Json(AccessTokenResponse {
                access_token: token.access_token,
                endpoint: token.endpoint,
            })
            .into_response(),
        ),
        Ok(None) => with_cookies(
            &cookies,
            axum::http::StatusCode::NO_CONTENT.into_response(),
        ),
        Err(err) => with_cookies(&cookies, provider_error_response(&err)),
    }
}
