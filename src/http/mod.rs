//! HTTP API server for the browser front-end
//!
//! This module provides a REST API for driving the tutor:
//! - POST /live/start - Start a live session
//! - POST /live/stop - Stop the live session
//! - GET /live/status - Query session statistics
//! - GET /live/transcript - Partial and completed turns
//! - POST /live/video - Forward one camera frame
//! - GET|POST /notebook, GET|DELETE /notebook/:id - Saved entries
//! - GET|PUT /goals - Learner goals
//! - POST /speech - Pronounce a word as WAV
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
