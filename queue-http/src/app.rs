use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request};
use axum::routing::{get, post};
use axum::{middleware, response::Response, Router};
use queue_core::backend::QueueBackend;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::rest;
use crate::state::AppState;

async fn ensure_request_id(req: Request<Body>, next: middleware::Next) -> Response {
    let header = HeaderName::from_static("x-request-id");

    let mut req = req;
    let request_id =
        req.headers().get(&header).and_then(|v| v.to_str().ok()).map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());

    if req.headers().get(&header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(header.clone(), v);
        }
    }

    let mut res = next.run(req).await;

    if res.headers().get(&header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            res.headers_mut().insert(header, v);
        }
    }

    res
}

/// Builds the management API router, mounted at `/api/v1/queue/*`.
/// Authentication is delegated to whatever layer the embedding process
/// adds in front of this router (a reverse proxy, or an additional
/// `tower::Layer` via `Router::layer`); this crate only implements the
/// queue-management surface itself.
pub fn build_router<B: QueueBackend + 'static>(state: AppState<B>) -> Router {
    let queue_routes = Router::new()
        .route("/stats", get(rest::get_stats::<B>))
        .route("/jobs", get(rest::list_jobs::<B>).post(rest::create_job::<B>))
        .route("/jobs/{id}", get(rest::get_job::<B>))
        .route("/jobs/{id}/retry", post(rest::retry_job::<B>))
        .route("/jobs/{id}/cancel", post(rest::cancel_job::<B>))
        .route("/jobs/{id}/reset", post(rest::reset_job::<B>))
        .route("/jobs/{id}/delete", post(rest::delete_job::<B>))
        .route("/pause", post(rest::pause_queue::<B>))
        .route("/resume", post(rest::resume_queue::<B>))
        .route("/clear", post(rest::clear_queue::<B>));

    Router::new()
        .nest("/api/v1/queue", queue_routes)
        .layer(middleware::from_fn(ensure_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
