//! Realtime tutoring session
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Speaker and microphone lifetime for one conversation
//! - The streaming connection to the Gemini Live endpoint
//! - Inbound dispatch to the playback queue and transcript aggregator
//! - Observer notifications and session statistics

mod config;
pub mod messages;
mod observer;
mod session;
mod state;
mod stats;
pub mod transport;

pub use config::LiveSessionConfig;
pub use messages::{ClientMessage, InboundEvent, ServerMessage, SetupMessage};
pub use observer::{ChannelObserver, SessionEvent, SessionLog, SessionObserver, TranscriptSnapshot};
pub use session::{ConnectOutcome, LiveSession};
pub use state::SessionState;
pub use stats::SessionStats;
pub use transport::{
    ConnectorConfig, GeminiLiveConnector, LiveConnection, LiveConnector, Outgoing, OutboundSink,
    TransportEvent,
};
