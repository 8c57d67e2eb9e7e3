use serde::{Deserialize, Serialize};

/// Lifecycle of a live session.
///
/// `Idle -> Connecting -> Open -> Closed`, with `Error` reachable from
/// `Connecting` or `Open`. `Error` is terminal for the connection and settles
/// into `Closed` once the observer has been told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    Error,
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        }
    }

    /// Holding, or about to hold, devices and a connection
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Open)
    }

    pub fn can_connect(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
