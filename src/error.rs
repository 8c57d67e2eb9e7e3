use thiserror::Error;

/// Failures surfaced to the caller of a live session or a pronunciation request.
///
/// Malformed inbound audio never shows up here: it is truncated or skipped
/// where it is decoded and the session keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone, speaker or camera could not be opened (denied or missing).
    #[error("audio device unavailable: {0}")]
    Device(String),

    /// The streaming connection failed to open, dropped, or the remote
    /// reported an error.
    #[error("connection error: {0}")]
    Transport(String),

    /// The remote answered but without the payload we asked for
    /// (e.g. text instead of audio).
    #[error("response did not contain {0}")]
    MissingResponse(String),
}

impl SessionError {
    pub(crate) fn device(err: anyhow::Error) -> Self {
        Self::Device(format!("{:#}", err))
    }

    pub(crate) fn transport(err: anyhow::Error) -> Self {
        Self::Transport(format!("{:#}", err))
    }
}
