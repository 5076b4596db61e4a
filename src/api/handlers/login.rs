use super::{auth_error_response, error_response, valid_identifier, with_cookies};
use crate::auth::{DeviceInfo, RequestCookies, SessionBroker};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    /// Email address or username.
    pub identifier: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct LoginResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub session_id: String,
    pub installed: bool,
}

#[utoipa::path(
    post,
    path= "/v1/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Session established, tokens set as cookies", body = [LoginResponse]),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Identifier locked out after repeated failures")
    ),
    tag= "auth"
)]
// axum handler for login
pub async fn login(
    broker: Extension<Arc<SessionBroker>>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Response {
    // Same generic failure as a wrong password; the shape of the identifier
    // must not become an oracle.
    if !valid_identifier(&request.identifier) || request.password.is_empty() {
        return error_response(StatusCode::UNAUTHORIZED, "invalid credentials");
    }

    let mut cookies = RequestCookies::from_headers(&headers);
    let device = DeviceInfo::from_headers(&headers);

    match broker
        .login(&mut cookies, &device, &request.identifier, &request.password)
        .await
    {
        Ok(outcome) => with_cookies(
            &cookies,
            Json(LoginResponse {
                id: outcome.user.id,
                email: outcome.user.email,
                username: outcome.user.username,
                session_id: outcome.session_id,
                installed: outcome.installed,
            })
            .into_response(),
        ),
        Err(err) => auth_error_response(&err),
    }
}
