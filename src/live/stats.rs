use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// When the connection opened, if it ever did
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since the connection opened
    pub duration_secs: f64,

    /// Microphone chunks handed to the connection
    pub audio_chunks_sent: u64,

    /// Microphone chunks dropped because the outbound queue was full
    pub audio_chunks_dropped: u64,

    /// Inline audio chunks scheduled for playback
    pub audio_chunks_received: u64,

    /// Camera frames handed to the connection
    pub video_frames_sent: u64,

    /// Turns reported through `on_turn_complete`
    pub turns_completed: u64,

    /// Barge-in signals received
    pub interruptions: u64,
}
