//! Session notifications.
//!
//! The session calls its observer outside of any internal lock, so an
//! observer may call back into the session (for example to disconnect).

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::transcript::CompletedTurn;

pub trait SessionObserver: Send + Sync {
    /// Current partial texts after a fragment was applied
    fn on_transcript_update(&self, user: &str, ai: &str);

    /// A turn finished with at least one side non-empty
    fn on_turn_complete(&self, _turn: &CompletedTurn) {}

    /// Connect failed or the connection broke. Called at most once.
    fn on_error(&self, error: &SessionError);

    /// The remote side closed the connection. Called at most once.
    fn on_close(&self);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    TranscriptUpdate { user: String, ai: String },
    TurnComplete(CompletedTurn),
    Error { message: String },
    Closed,
}

/// Forwards every notification as a [`SessionEvent`]
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone just means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn on_transcript_update(&self, user: &str, ai: &str) {
        self.emit(SessionEvent::TranscriptUpdate {
            user: user.to_string(),
            ai: ai.to_string(),
        });
    }

    fn on_turn_complete(&self, turn: &CompletedTurn) {
        self.emit(SessionEvent::TurnComplete(turn.clone()));
    }

    fn on_error(&self, error: &SessionError) {
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
    }

    fn on_close(&self) {
        self.emit(SessionEvent::Closed);
    }
}

/// What a [`SessionLog`] has seen so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSnapshot {
    pub user: String,
    pub ai: String,
    pub turns: Vec<CompletedTurn>,
    pub last_error: Option<String>,
    pub closed: bool,
}

/// Observer that remembers the conversation for later polling
#[derive(Debug, Default)]
pub struct SessionLog {
    inner: Mutex<TranscriptSnapshot>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.inner
            .lock()
            .map(|inner| inner.clone())
            .unwrap_or_default()
    }

    fn update(&self, f: impl FnOnce(&mut TranscriptSnapshot)) {
        if let Ok(mut inner) = self.inner.lock() {
            f(&mut inner);
        }
    }
}

impl SessionObserver for SessionLog {
    fn on_transcript_update(&self, user: &str, ai: &str) {
        self.update(|log| {
            log.user = user.to_string();
            log.ai = ai.to_string();
        });
    }

    fn on_turn_complete(&self, turn: &CompletedTurn) {
        self.update(|log| {
            log.user.clear();
            log.ai.clear();
            log.turns.push(turn.clone());
        });
    }

    fn on_error(&self, error: &SessionError) {
        self.update(|log| log.last_error = Some(error.to_string()));
    }

    fn on_close(&self) {
        self.update(|log| log.closed = true);
    }
}
