use crate::{
    auth::{
        BruteForceGuard, CredentialCipher, PgRevocationStore, PgUserRepository, SessionBroker,
        SessionPolicy, TokenCodec,
    },
    cli::globals::GlobalArgs,
    oauth::{
        AuthCodeProvider, CredentialRegistry, DeviceFlowProvider, ProviderConfig, ProviderType,
    },
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

const GITHUB_DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_INFO_URL: &str = "https://api.github.com/user";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let codec = TokenCodec::new(
        globals.signing_secret.expose_secret(),
        globals.encryption_secret.expose_secret(),
    )?;

    let broker = Arc::new(SessionBroker::new(
        codec,
        Arc::new(PgRevocationStore::new(pool.clone())),
        Arc::new(PgUserRepository::new(pool.clone())),
        BruteForceGuard::new(),
        SessionPolicy::default().with_secure_cookies(globals.secure_cookies),
    ));

    let registry = Arc::new(build_registry(globals)?);

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static("x-display-mode"),
            HeaderName::from_static("x-viewport-width"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/auth/login", post(handlers::login))
        .route("/v1/auth/session", get(handlers::session))
        .route("/v1/auth/refresh", post(handlers::refresh))
        .route("/v1/auth/logout", post(handlers::logout))
        .route("/v1/auth/logout-all", post(handlers::logout_all))
        .route("/v1/credentials/:provider/url", get(handlers::auth_url))
        .route("/v1/credentials/:provider/token", post(handlers::token))
        .route(
            "/v1/credentials/:provider/access-token",
            get(handlers::access_token),
        )
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(broker))
                .layer(Extension(registry)),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Build the provider registry from whatever provider settings are present.
/// A missing provider is simply absent from the registry, not an error.
fn build_registry(globals: &GlobalArgs) -> Result<CredentialRegistry> {
    let mut registry = CredentialRegistry::new();
    let cipher = CredentialCipher::new(globals.encryption_secret.expose_secret());

    if let Some(client_id) = &globals.github_client_id {
        let config = ProviderConfig {
            client_id: client_id.clone(),
            client_secret: None,
            scopes: vec!["read:user".to_string()],
            token_url: GITHUB_TOKEN_URL.to_string(),
            device_code_url: Some(GITHUB_DEVICE_CODE_URL.to_string()),
            auth_url: None,
            user_info_url: Some(GITHUB_USER_INFO_URL.to_string()),
            redirect_uri: None,
        };
        registry.register(
            ProviderType::Github,
            Arc::new(DeviceFlowProvider::new(
                ProviderType::Github.as_str(),
                config,
                cipher.clone(),
                globals.secure_cookies,
            )?),
        );
    }

    if let Some(client_id) = &globals.google_client_id {
        let config = ProviderConfig {
            client_id: client_id.clone(),
            client_secret: globals.google_client_secret.clone(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
            token_url: GOOGLE_TOKEN_URL.to_string(),
            device_code_url: None,
            auth_url: Some(GOOGLE_AUTH_URL.to_string()),
            user_info_url: None,
            redirect_uri: globals.google_redirect_uri.clone(),
        };
        registry.register(
            ProviderType::Google,
            Arc::new(AuthCodeProvider::new(
                ProviderType::Google.as_str(),
                config,
                cipher,
                globals.secure_cookies,
            )?),
        );
    }

    if registry.is_empty() {
        warn!("no external credential providers configured");
    }

    Ok(registry)
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
