use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, MatchedPath, State};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{
    convert_handler, health_handler, metrics_handler, root_handler, upload_handler,
    MULTIPART_OVERHEAD,
};
use super::openapi::openapi_handler;
use super::state::AppState;
use crate::metrics::Metrics;

/// Body limit for the JSON endpoint; the request only carries a URL and flags.
const JSON_BODY_LIMIT: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let upload_limit = state
        .config
        .max_file_size_bytes()
        .saturating_add(MULTIPART_OVERHEAD);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    let convert = Router::new()
        .route(
            "/convert",
            post(convert_handler).layer(DefaultBodyLimit::max(JSON_BODY_LIMIT)),
        )
        .route(
            "/convert/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        );

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_handler))
        .merge(convert)
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Count and time every routed request, labelled by its route template.
async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());
    let method = req.method().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;
    metrics.record_request(&endpoint, &method, resp.status().as_u16(), started.elapsed());
    resp
}
