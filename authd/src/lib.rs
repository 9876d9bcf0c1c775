pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use service_core::axum::{
    middleware::from_fn,
    routing::{get, post},
    Json, Router,
};
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use service_core::observability::PrometheusHandle;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::services::AuthService;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health_check,
        handlers::auth::sign_up,
        handlers::auth::confirm_sign_up,
        handlers::auth::request_password_reset,
        handlers::auth::confirm_password_reset,
        handlers::auth::sign_in,
        handlers::auth::refresh,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::CredentialsRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordUpdateRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::TokenResponse,
        )
    ),
    tags(
        (name = "Authentication", description = "Account sign-up, confirmation, password reset and tokens"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub auth: AuthService,
    /// `None` when no Prometheus recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(handlers::auth::sign_up))
        .route("/signup/confirm/:id", post(handlers::auth::confirm_sign_up))
        .route("/pwreset", post(handlers::auth::request_password_reset))
        .route(
            "/pwreset/confirm/:id",
            post(handlers::auth::confirm_password_reset),
        )
        .route("/signin", post(handlers::auth::sign_in))
        .route("/refresh", post(handlers::auth::refresh));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .nest("/v1/auth", auth_routes)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}
