use super::state::AppState;
use crate::error::SessionError;
use crate::live::{ConnectOutcome, SessionLog, SessionStats, TranscriptSnapshot};
use crate::store::{DictionaryEntry, SavedEntry};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Language the learner speaks (e.g. "English")
    pub native_language: String,

    /// Language being practised (e.g. "Spanish")
    pub target_language: String,

    /// Optional goal to steer the conversation toward
    pub focus_topic: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct VideoFrameRequest {
    /// Base64 JPEG or PNG, optionally as a `data:` URL
    pub image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntryRequest {
    #[serde(flatten)]
    pub entry: DictionaryEntry,

    /// Defaults to now
    pub saved_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn store_failure(action: &str, e: anyhow::Error) -> Response {
    error!("Failed to {}: {:#}", action, e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to {}: {}", action, e),
    )
}

/// Strip an optional `data:image/...;base64,` header and decode
fn decode_image(image: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match image.split_once(";base64,") {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => image,
    };
    base64::engine::general_purpose::STANDARD.decode(payload.trim())
}

// ============================================================================
// Live session
// ============================================================================

/// POST /live/start
/// Open the microphone, speaker and remote connection
pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let config = state.live.session_config(
        &req.native_language,
        &req.target_language,
        req.focus_topic,
    );
    let session_id = config.session_id.clone();

    info!(
        "Starting live session {} ({} -> {})",
        session_id, req.native_language, req.target_language
    );

    let log = Arc::new(SessionLog::new());

    match state.session.connect(config, Arc::<SessionLog>::clone(&log)).await {
        Ok(ConnectOutcome::Opened) => {}
        Ok(ConnectOutcome::AlreadyActive(current)) => {
            return error_response(
                StatusCode::CONFLICT,
                format!("A live session is already {}", current),
            );
        }
        Ok(ConnectOutcome::Cancelled) => {
            return error_response(
                StatusCode::CONFLICT,
                "Live session was stopped while connecting",
            );
        }
        Err(e) => {
            error!("Failed to start live session: {}", e);
            install_log(&state, &session_id, log).await;
            let status = match e {
                SessionError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            };
            return error_response(status, format!("Failed to start live session: {}", e));
        }
    }

    install_log(&state, &session_id, log).await;

    state.camera.clear();
    state
        .session
        .start_video(Arc::new(state.camera.clone()), state.video.clone());

    let stats = state.session.stats();
    (
        StatusCode::OK,
        Json(StartSessionResponse {
            session_id: stats.session_id,
            status: stats.state.to_string(),
            message: format!("Live session started in {}", req.target_language),
        }),
    )
        .into_response()
}

/// Make `log` the one `/live/transcript` reads, unless a newer session has
/// already claimed the slot
async fn install_log(state: &AppState, session_id: &str, log: Arc<SessionLog>) {
    let mut slot = state.log.write().await;
    if state.session.stats().session_id == session_id {
        *slot = log;
    }
}

/// POST /live/stop
/// Stop the session and return its final statistics
pub async fn stop_session(State(state): State<AppState>) -> Json<SessionStats> {
    state.session.disconnect().await;
    let stats = state.session.stats();
    info!("Live session {} stopped", stats.session_id);
    Json(stats)
}

/// GET /live/status
pub async fn get_session_status(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.session.stats())
}

/// GET /live/transcript
/// Partial texts of the current turn plus every completed turn
pub async fn get_session_transcript(State(state): State<AppState>) -> Json<TranscriptSnapshot> {
    let log = state.log.read().await;
    Json(log.snapshot())
}

/// POST /live/video
/// Publish the latest camera frame; the session samples it at its own cadence
pub async fn send_video_frame(
    State(state): State<AppState>,
    Json(req): Json<VideoFrameRequest>,
) -> impl IntoResponse {
    if !state.session.is_open() {
        return error_response(StatusCode::CONFLICT, "Live session is not open");
    }

    let bytes = match decode_image(&req.image) {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid image data: {}", e))
        }
    };

    match image::load_from_memory(&bytes) {
        Ok(frame) => {
            state.camera.publish(frame.to_rgb8());
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("Invalid image data: {}", e)),
    }
}

// ============================================================================
// Notebook
// ============================================================================

/// GET /notebook
/// Saved entries, newest first
pub async fn list_entries(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.all_entries().await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => store_failure("list notebook entries", e),
    }
}

/// POST /notebook
pub async fn save_entry(
    State(state): State<AppState>,
    Json(req): Json<SaveEntryRequest>,
) -> impl IntoResponse {
    if req.entry.id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Entry id must not be empty");
    }

    let saved = match req.saved_at {
        Some(saved_at) => SavedEntry {
            entry: req.entry,
            saved_at,
        },
        None => SavedEntry::now(req.entry),
    };

    match state.store.put_entry(saved.clone()).await {
        Ok(()) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => store_failure("save notebook entry", e),
    }
}

/// GET /notebook/:entry_id
pub async fn get_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> impl IntoResponse {
    match state.store.entry(&entry_id).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(entry)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("Entry {} not found", entry_id),
        ),
        Err(e) => store_failure("read notebook entry", e),
    }
}

/// DELETE /notebook/:entry_id
pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<String>,
) -> impl IntoResponse {
    match state.store.remove_entry(&entry_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            format!("Entry {} not found", entry_id),
        ),
        Err(e) => store_failure("delete notebook entry", e),
    }
}

/// GET /goals
pub async fn get_goals(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.goals().await {
        Ok(goals) => (StatusCode::OK, Json(goals)).into_response(),
        Err(e) => store_failure("read goals", e),
    }
}

/// PUT /goals
pub async fn put_goals(
    State(state): State<AppState>,
    Json(goals): Json<Vec<String>>,
) -> impl IntoResponse {
    let goals: Vec<String> = goals
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();

    match state.store.save_goals(goals.clone()).await {
        Ok(()) => (StatusCode::OK, Json(goals)).into_response(),
        Err(e) => store_failure("save goals", e),
    }
}

// ============================================================================
// Pronunciation
// ============================================================================

/// POST /speech
/// Speak a word or sentence, returned as a WAV file
pub async fn pronounce(
    State(state): State<AppState>,
    Json(req): Json<SpeechRequest>,
) -> impl IntoResponse {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text must not be empty");
    }

    match state.pronouncer.pronounce(&req.text).await {
        Ok(wav) => ([(header::CONTENT_TYPE, "audio/wav")], wav.as_ref().clone()).into_response(),
        Err(e) => {
            warn!("Pronunciation failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
