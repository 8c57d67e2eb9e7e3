use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Both sides of one finished exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTurn {
    pub user: String,
    pub ai: String,
    pub completed_at: DateTime<Utc>,
}

/// Rebuilds utterances from incremental transcription fragments.
///
/// Fragments are appended verbatim in delivery order. The user buffer is only
/// cleared by [`take_turn`](Self::take_turn); the AI buffer is also cleared by
/// [`discard_ai`](Self::discard_ai) when an utterance is interrupted.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAggregator {
    user: String,
    ai: String,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    pub fn append_ai(&mut self, fragment: &str) {
        self.ai.push_str(fragment);
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn ai(&self) -> &str {
        &self.ai
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.ai.is_empty()
    }

    /// Drop the partial AI utterance. Returns whether anything was dropped.
    pub fn discard_ai(&mut self) -> bool {
        let had_text = !self.ai.is_empty();
        self.ai.clear();
        had_text
    }

    /// Close the current turn. Both buffers are empty afterwards.
    ///
    /// Returns `None` when neither side said anything.
    pub fn take_turn(&mut self) -> Option<CompletedTurn> {
        let user = std::mem::take(&mut self.user);
        let ai = std::mem::take(&mut self.ai);

        if user.is_empty() && ai.is_empty() {
            return None;
        }

        Some(CompletedTurn {
            user,
            ai,
            completed_at: Utc::now(),
        })
    }

    pub fn reset(&mut self) {
        self.user.clear();
        self.ai.clear();
    }
}
