pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod session;
pub use self::session::{logout, logout_all, refresh, session};

pub mod oauth;
pub use self::oauth::{access_token, auth_url, token};

// common functions for the handlers
use crate::auth::{AuthError, RequestCookies};
use crate::oauth::ProviderError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use regex::Regex;
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").is_ok_and(|re| re.is_match(username))
}

/// A login identifier is an email address or a username.
pub fn valid_identifier(identifier: &str) -> bool {
    valid_email(identifier) || valid_username(identifier)
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Attach the accumulated `Set-Cookie` headers to a response.
pub fn with_cookies(cookies: &RequestCookies, mut response: Response) -> Response {
    if let Err(err) = cookies.apply(response.headers_mut()) {
        error!("failed to encode cookie header: {err}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }
    response
}

pub fn auth_error_response(err: &AuthError) -> Response {
    match err {
        AuthError::InvalidCredentials => {
            error_response(StatusCode::UNAUTHORIZED, "invalid credentials")
        }
        AuthError::RateLimited {
            retry_after_seconds,
        } => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "too many failed attempts, try again later",
            );
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
        AuthError::Internal(err) => {
            error!("internal auth error: {err:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

pub fn provider_error_response(err: &ProviderError) -> Response {
    match err {
        ProviderError::TokenRevoked => {
            error_response(StatusCode::UNAUTHORIZED, "provider credential revoked")
        }
        ProviderError::DeviceCodeExpired => {
            error_response(StatusCode::GONE, "device authorization expired")
        }
        ProviderError::Transient(message) => {
            error!("transient provider failure: {message}");
            error_response(StatusCode::BAD_GATEWAY, "provider temporarily unavailable")
        }
        ProviderError::Rejected(message) => error_response(StatusCode::BAD_REQUEST, message),
        ProviderError::NotConfigured(name) => error_response(
            StatusCode::NOT_FOUND,
            &format!("provider not configured: {name}"),
        ),
        ProviderError::Internal(err) => {
            error!("internal provider error: {err:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_accepts_emails_and_usernames() {
        assert!(valid_identifier("ada@school.example"));
        assert!(valid_identifier("ada"));
        assert!(valid_identifier("ada.lovelace-01"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("has spaces"));
        assert!(!valid_identifier("@missing-local.example"));
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = auth_error_response(&AuthError::RateLimited {
            retry_after_seconds: 90,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Retry-After").map(|v| v.to_str().ok()),
            Some(Some("90"))
        );
    }

    #[test]
    fn provider_errors_map_to_expected_statuses() {
        assert_eq!(
            provider_error_response(&ProviderError::TokenRevoked).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            provider_error_response(&ProviderError::DeviceCodeExpired).status(),
            StatusCode::GONE
        );
        assert_eq!(
            provider_error_response(&ProviderError::Transient("503".to_string())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            provider_error_response(&ProviderError::NotConfigured("gitlab".to_string())).status(),
            StatusCode::NOT_FOUND
        );
    }
}
