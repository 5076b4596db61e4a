use super::{auth_error_response, error_response, with_cookies};
use crate::auth::{DeviceInfo, RequestCookies, SessionBroker};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Debug)]
pub struct SessionResponse {
    pub id: String,
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub installed: bool,
    pub expires_at: i64,
    /// True when this request silently rotated the session tokens.
    pub refreshed: bool,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct RefreshResponse {
    pub expires_at: i64,
}

#[utoipa::path(
    get,
    path= "/v1/auth/session",
    responses (
        (status = 200, description = "Current session, silently refreshed if needed", body = [SessionResponse]),
        (status = 401, description = "Anonymous")
    ),
    tag= "auth"
)]
// axum handler for session
pub async fn session(
    broker: Extension<Arc<SessionBroker>>,
    headers: HeaderMap,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);
    let device = DeviceInfo::from_headers(&headers);

    match broker.get_session(&mut cookies, &device).await {
        Ok(Some((user, session))) => with_cookies(
            &cookies,
            Json(SessionResponse {
                id: session.id,
                user_id: user.id,
                email: user.email,
                username: user.username,
                installed: session.installed,
                expires_at: session.expires_at,
                refreshed: session.refreshed,
            })
            .into_response(),
        ),
        Ok(None) => with_cookies(
            &cookies,
            error_response(StatusCode::UNAUTHORIZED, "not authenticated"),
        ),
        Err(err) => auth_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/auth/refresh",
    responses (
        (status = 200, description = "Tokens rotated, new cookies set", body = [RefreshResponse]),
        (status = 401, description = "Refresh token missing, invalid, replayed or device mismatch")
    ),
    tag= "auth"
)]
// axum handler for refresh
pub async fn refresh(
    broker: Extension<Arc<SessionBroker>>,
    headers: HeaderMap,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);
    let device = DeviceInfo::from_headers(&headers);

    match broker.refresh(&mut cookies, &device).await {
        Ok(Some(claims)) => with_cookies(
            &cookies,
            Json(RefreshResponse {
                expires_at: claims.exp,
            })
            .into_response(),
        ),
        Ok(None) => with_cookies(
            &cookies,
            error_response(StatusCode::UNAUTHORIZED, "refresh rejected"),
        ),
        Err(err) => auth_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path= "/v1/auth/logout",
    responses (
        (status = 204, description = "Session revoked and cookies cleared")
    ),
    tag= "auth"
)]
// axum handler for logout
pub async fn logout(broker: Extension<Arc<SessionBroker>>, headers: HeaderMap) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);
    broker.logout(&mut cookies).await;
    with_cookies(&cookies, StatusCode::NO_CONTENT.into_response())
}

#[utoipa::path(
    post,
    path= "/v1/auth/logout-all",
    responses (
        (status = 204, description = "All sessions of the user revoked"),
        (status = 401, description = "Anonymous")
    ),
    tag= "auth"
)]
// axum handler for logout-all
pub async fn logout_all(
    broker: Extension<Arc<SessionBroker>>,
    headers: HeaderMap,
) -> Response {
    let mut cookies = RequestCookies::from_headers(&headers);
    let device = DeviceInfo::from_headers(&headers);

    let user_id = match broker.get_session(&mut cookies, &device).await {
        Ok(Some((user, _))) => user.id,
        Ok(None) => {
            return with_cookies(
                &cookies,
                error_response(StatusCode::UNAUTHORIZED, "not authenticated"),
            )
        }
        Err(err) => return auth_error_response(&err),
    };

    match broker.logout_all(&mut cookies, user_id).await {
        Ok(()) => with_cookies(&cookies, StatusCode::NO_CONTENT.into_response()),
        Err(err) => auth_error_response(&err),
    }
}
