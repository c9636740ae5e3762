use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{routes, state::AppState};

/// Construct the Axum [`Router`] with all routes and middleware attached.
///
/// Middleware runs outermost first on request:
///
/// 1. `TraceLayer` for structured request/response logging via `tracing`.
/// 2. `CorsLayer`, open unless `ADRECON_CORS_ORIGINS` lists origins.
/// 3. `CompressionLayer`, since reconciled views carry long day series.
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/reconcile", post(routes::reconcile::reconcile))
        .route("/api/normalize", post(routes::normalize::normalize))
        .route("/api/landing-pages", post(routes::landing::landing_pages))
        .route("/api/budget/pacing", post(routes::pacing::pacing))
        .route("/api/attribution/match", post(routes::attribution::match_labels))
        .route("/api/attribution/rules", get(routes::attribution::list_rules))
        .route("/api/negatives/evaluate", post(routes::negatives::evaluate))
        .route("/api/negatives/suggest", post(routes::negatives::suggest))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed)
    }
}
