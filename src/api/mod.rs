pub mod error;
pub mod response;
pub mod v1;

use axum::{
    http::HeaderValue, http::StatusCode, middleware, response::IntoResponse, routing::get, Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{app::AppState, auth, config::Config};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let api = v1::router(state).layer(middleware::from_fn_with_state(
        auth::BearerToken::new(&cfg.auth.token),
        auth::require_bearer,
    ));

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", api);

    if !cfg.server.cors_origins.is_empty() {
        let origins: Vec<HeaderValue> = cfg
            .server
            .cors_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        let cors = CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(cfg.server.body_limit_bytes))
                .layer(TimeoutLayer::new(Duration::from_secs(cfg.server.request_timeout_seconds))),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}
