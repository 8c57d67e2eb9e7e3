pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod live;
pub mod speech;
pub mod store;
pub mod transcript;
pub mod video;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, CpalDevices, PcmChunk,
    PlaybackBuffer, PlaybackOutput, PlaybackQueue,
};
pub use config::Config;
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use live::{
    ConnectOutcome, GeminiLiveConnector, LiveConnector, LiveSession, LiveSessionConfig, SessionObserver,
    SessionState, SessionStats,
};
pub use speech::{Pronouncer, SpeechClient, SpeechSynthesizer};
pub use store::{JsonFileStore, NotebookStore, SavedEntry};
pub use transcript::{CompletedTurn, TranscriptAggregator};
