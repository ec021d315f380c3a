//! API route definitions.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, warn};

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors_origins);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api_routes = Router::new()
        // Jobs
        .route("/scrape", post(handlers::start_job))
        .route("/pause", post(handlers::pause_job))
        .route("/stop", post(handlers::stop_job))
        // Live progress
        .route("/stream/{session_id}", get(handlers::stream_events))
        .route("/sessions", get(handlers::list_sessions))
        // Lookups
        .route("/locations", get(handlers::list_locations))
        // Exports
        .route("/downloads", get(handlers::list_downloads))
        .route("/download/{filename}", get(handlers::download_file))
        .route("/export-current", post(handlers::export_current));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            reap_idle_sessions,
        ))
        .layer(cors)
        .layer(trace_layer)
        .with_state(state)
}

/// Every inbound request triggers one reaper sweep before it is handled.
async fn reap_idle_sessions(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.reaper.sweep();
    next.run(request).await
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("CORS: ignoring invalid origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}
