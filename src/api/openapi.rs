use super::handlers::{health, login, oauth, session, ErrorBody};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        login::login,
        session::session,
        session::refresh,
        session::logout,
        session::logout_all,
        oauth::auth_url,
        oauth::token,
        oauth::access_token,
    ),
    components(schemas(
        ErrorBody,
        health::Health,
        login::LoginRequest,
        login::LoginResponse,
        session::SessionResponse,
        session::RefreshResponse,
        oauth::AuthUrlResponse,
        oauth::TokenRequest,
        oauth::TokenStatusResponse,
        oauth::AccessTokenResponse,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Session lifecycle: login, refresh, logout"),
        (name = "credentials", description = "External provider credential flows")
    )
)]
pub struct ApiDoc;
