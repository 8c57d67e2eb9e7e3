use crate::config::LiveConfig;
use crate::live::{LiveSession, SessionLog};
use crate::speech::Pronouncer;
use crate::store::NotebookStore;
use crate::video::{SharedFrame, VideoSamplerConfig};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one live session this process drives
    pub session: LiveSession,

    /// Observer of the most recently started session
    pub log: Arc<RwLock<Arc<SessionLog>>>,

    /// Latest frame posted by the browser camera
    pub camera: SharedFrame,

    /// Saved entries and goals
    pub store: Arc<dyn NotebookStore>,

    /// Single-utterance pronunciation with its cache
    pub pronouncer: Arc<Pronouncer>,

    /// Model, voice and rates for new sessions
    pub live: Arc<LiveConfig>,

    /// Camera sampling cadence and compression
    pub video: VideoSamplerConfig,
}

impl AppState {
    pub fn new(
        session: LiveSession,
        store: Arc<dyn NotebookStore>,
        pronouncer: Arc<Pronouncer>,
        live: LiveConfig,
        video: VideoSamplerConfig,
    ) -> Self {
        Self {
            session,
            log: Arc::new(RwLock::new(Arc::new(SessionLog::new()))),
            camera: SharedFrame::new(),
            store,
            pronouncer,
            live: Arc::new(live),
            video,
        }
    }
}
