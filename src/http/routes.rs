use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Notebook entries may carry an inline illustration
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Live session control
        .route("/live/start", post(handlers::start_session))
        .route("/live/stop", post(handlers::stop_session))
        .route("/live/status", get(handlers::get_session_status))
        .route("/live/transcript", get(handlers::get_session_transcript))
        .route("/live/video", post(handlers::send_video_frame))
        // Notebook
        .route(
            "/notebook",
            get(handlers::list_entries).post(handlers::save_entry),
        )
        .route(
            "/notebook/:entry_id",
            get(handlers::get_entry).delete(handlers::delete_entry),
        )
        .route("/goals", get(handlers::get_goals).put(handlers::put_goals))
        // Pronunciation
        .route("/speech", post(handlers::pronounce))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // Browser front-end runs on its own origin
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
