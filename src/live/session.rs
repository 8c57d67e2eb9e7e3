use anyhow::Context;
use base64::Engine;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::LiveSessionConfig;
use super::messages::ServerMessage;
use super::observer::SessionObserver;
use super::state::SessionState;
use super::stats::SessionStats;
use super::transport::{LiveConnector, OutboundSink, TransportEvent};
use crate::audio::{
    pcm, AudioBackend, AudioBackendConfig, AudioDevices, CapturePipeline, CaptureStats,
    PlaybackBuffer, PlaybackQueue, SourceId,
};
use crate::error::SessionError;
use crate::transcript::{CompletedTurn, TranscriptAggregator};
use crate::video::{FrameSource, VideoFrameSampler, VideoSamplerConfig, VideoSink};

/// Everything a session holds while connecting or open.
///
/// Dropping it releases synchronously; [`Resources::release`] does the same
/// in the documented order and waits for tasks to finish.
#[derive(Default)]
struct Resources {
    reader: Option<JoinHandle<()>>,
    outbound: Option<OutboundSink>,
    input: Option<Box<dyn AudioBackend>>,
    capture: Option<CapturePipeline>,
    video: Option<VideoFrameSampler>,
    playback: Option<PlaybackQueue>,
    tasks: Vec<JoinHandle<()>>,
}

impl Resources {
    async fn release(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }

        if let Some(outbound) = self.outbound.take() {
            outbound.close();
        }

        if let Some(mut input) = self.input.take() {
            if let Err(e) = input.stop().await {
                warn!("Failed to stop {}: {:#}", input.name(), e);
            }
        }

        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }

        if let Some(mut video) = self.video.take() {
            video.stop().await;
        }

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close() {
                warn!("Failed to close playback output: {:#}", e);
            }
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(outbound) = self.outbound.take() {
            outbound.close();
        }
        // Capture, video and the microphone stop themselves when dropped
        if let Some(mut playback) = self.playback.take() {
            let _ = playback.close();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

struct Shared {
    state: SessionState,
    /// Bumped by every teardown so stale tasks and connects can tell
    generation: u64,
    session_id: String,
    output_sample_rate: u32,
    observer: Option<Arc<dyn SessionObserver>>,
    transcript: TranscriptAggregator,
    resources: Resources,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// Capture counters of pipelines already torn down
    capture_totals: CaptureStats,
    audio_chunks_received: u64,
    video_frames_sent: u64,
    turns_completed: u64,
    interruptions: u64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            session_id: String::new(),
            output_sample_rate: 24000,
            observer: None,
            transcript: TranscriptAggregator::new(),
            resources: Resources::default(),
            started_at: None,
            ended_at: None,
            capture_totals: CaptureStats::default(),
            audio_chunks_received: 0,
            video_frames_sent: 0,
            turns_completed: 0,
            interruptions: 0,
        }
    }

    /// Invalidate everything in flight and hand the resources to the caller.
    fn teardown(&mut self, state: SessionState) -> Resources {
        self.generation += 1;
        self.state = state;
        if self.started_at.is_some() && self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        if let Some(capture) = &self.resources.capture {
            let stats = capture.stats();
            self.capture_totals.chunks_sent += stats.chunks_sent;
            self.capture_totals.chunks_dropped += stats.chunks_dropped;
            self.capture_totals.backlog_discarded += stats.backlog_discarded;
        }
        std::mem::take(&mut self.resources)
    }

    fn capture_stats(&self) -> CaptureStats {
        let mut totals = self.capture_totals;
        if let Some(capture) = &self.resources.capture {
            let live = capture.stats();
            totals.chunks_sent += live.chunks_sent;
            totals.chunks_dropped += live.chunks_dropped;
            totals.backlog_discarded += live.backlog_discarded;
        }
        totals
    }
}

struct Inner {
    devices: Arc<dyn AudioDevices>,
    connector: Arc<dyn LiveConnector>,
    shared: Mutex<Shared>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        // Nothing in Shared is left half-updated by a panicking holder
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What a [`LiveSession::connect`] call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// This call opened the session
    Opened,
    /// Another connect or an open session already holds the devices
    AlreadyActive(SessionState),
    /// A disconnect arrived before the connection finished opening
    Cancelled,
}

/// Notifications gathered under the lock and delivered after it is released
enum Notification {
    Transcript { user: String, ai: String },
    TurnComplete(CompletedTurn),
}

/// A realtime tutoring session: microphone and camera out, voice and
/// transcripts back.
///
/// Cheap to clone; clones share the same session. At most one connection
/// is active at a time.
#[derive(Clone)]
pub struct LiveSession {
    inner: Arc<Inner>,
}

impl LiveSession {
    pub fn new(devices: Arc<dyn AudioDevices>, connector: Arc<dyn LiveConnector>) -> Self {
        Self {
            inner: Arc::new(Inner {
                devices,
                connector,
                shared: Mutex::new(Shared::new()),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Partial user and AI text of the turn in progress
    pub fn current_transcript(&self) -> (String, String) {
        let shared = self.inner.lock();
        (
            shared.transcript.user().to_string(),
            shared.transcript.ai().to_string(),
        )
    }

    pub fn stats(&self) -> SessionStats {
        let shared = self.inner.lock();
        let capture = shared.capture_stats();

        let duration_secs = match shared.started_at {
            Some(start) => {
                let end = shared.ended_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        SessionStats {
            session_id: shared.session_id.clone(),
            state: shared.state,
            started_at: shared.started_at,
            duration_secs,
            audio_chunks_sent: capture.chunks_sent,
            audio_chunks_dropped: capture.chunks_dropped,
            audio_chunks_received: shared.audio_chunks_received,
            video_frames_sent: shared.video_frames_sent,
            turns_completed: shared.turns_completed,
            interruptions: shared.interruptions,
        }
    }

    /// Open the speaker, the microphone and the remote connection, then start
    /// streaming.
    ///
    /// A call while a session is connecting, open or settling an error does
    /// nothing and reports [`ConnectOutcome::AlreadyActive`]. On failure every
    /// partially acquired device is released, `on_error` is called once and
    /// the error is returned.
    pub async fn connect(
        &self,
        config: LiveSessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Result<ConnectOutcome, SessionError> {
        let generation = {
            let mut shared = self.inner.lock();
            if !shared.state.can_connect() {
                info!(
                    "Session {} already {}, ignoring connect",
                    shared.session_id, shared.state
                );
                return Ok(ConnectOutcome::AlreadyActive(shared.state));
            }

            shared.generation += 1;
            shared.state = SessionState::Connecting;
            shared.session_id = config.session_id.clone();
            shared.output_sample_rate = config.output_sample_rate;
            shared.observer = Some(observer);
            shared.transcript.reset();
            shared.started_at = None;
            shared.ended_at = None;
            shared.capture_totals = CaptureStats::default();
            shared.audio_chunks_received = 0;
            shared.video_frames_sent = 0;
            shared.turns_completed = 0;
            shared.interruptions = 0;
            shared.generation
        };

        info!(
            "Connecting live session {} ({} -> {})",
            config.session_id, config.native_language, config.target_language
        );

        // (a) Speaker first, before any suspension point
        let output = match self.inner.devices.open_output(config.output_sample_rate) {
            Ok(output) => output,
            Err(e) => return self.fail_connect(generation, SessionError::device(e)).await,
        };
        {
            let mut shared = self.inner.lock();
            if shared.generation != generation {
                debug!("Connect superseded while opening the speaker");
                return Ok(ConnectOutcome::Cancelled);
            }
            shared.resources.playback = Some(PlaybackQueue::new(output.output));
            let pump = tokio::spawn(pump_ended(
                Arc::downgrade(&self.inner),
                generation,
                output.ended,
            ));
            shared.resources.tasks.push(pump);
        }

        // (b) Microphone, falling back to the device rate inside the backend
        let backend_config = AudioBackendConfig {
            preferred_sample_rate: config.input_sample_rate,
            block_size: config.block_size,
            ..Default::default()
        };
        let mut input = match self.inner.devices.open_input(backend_config) {
            Ok(input) => input,
            Err(e) => return self.fail_connect(generation, SessionError::device(e)).await,
        };

        // (c) Start capturing; frames queue up until the connection opens
        let frames = match input.start().await {
            Ok(frames) => frames,
            Err(e) => {
                let err = SessionError::device(e.context(format!("Failed to start {}", input.name())));
                return self.fail_connect(generation, err).await;
            }
        };
        info!("{} capturing at {}Hz", input.name(), input.sample_rate());

        // The running microphone belongs to the session from here on, so a
        // disconnect while the remote handshake is pending releases it
        let superseded = {
            let mut shared = self.inner.lock();
            if shared.generation != generation {
                Some(input)
            } else {
                shared.resources.input = Some(input);
                None
            }
        };
        if let Some(input) = superseded {
            debug!("Connect superseded while starting the microphone");
            stop_input(input).await;
            return Ok(ConnectOutcome::Cancelled);
        }

        // (d) Remote connection
        let connection = match self.inner.connector.connect(config.setup_message()).await {
            Ok(connection) => connection,
            Err(e) => return self.fail_connect(generation, SessionError::transport(e)).await,
        };

        // (e) Open: start streaming and dispatching
        let stale = {
            let mut shared = self.inner.lock();
            if shared.generation != generation {
                Some(connection)
            } else {
                shared.state = SessionState::Open;
                shared.started_at = Some(Utc::now());

                let capture = CapturePipeline::start(frames, connection.outbound.clone());
                let reader = tokio::spawn(run_reader(
                    Arc::downgrade(&self.inner),
                    generation,
                    connection.inbound,
                ));

                shared.resources.outbound = Some(connection.outbound);
                shared.resources.capture = Some(capture);
                shared.resources.reader = Some(reader);
                None
            }
        };

        if let Some(connection) = stale {
            info!("Session torn down while connecting, releasing new connection");
            connection.outbound.close();
            return Ok(ConnectOutcome::Cancelled);
        }

        info!("Live session {} open", config.session_id);
        Ok(ConnectOutcome::Opened)
    }

    /// Stop everything. Safe to call in any state and more than once.
    ///
    /// No observer callback fires during or after this call.
    pub async fn disconnect(&self) {
        let resources = {
            let mut shared = self.inner.lock();
            shared.observer = None;
            if shared.state.is_active() {
                info!("Disconnecting live session {}", shared.session_id);
            }
            shared.teardown(SessionState::Closed)
        };

        resources.release().await;
    }

    /// Forward one compressed camera frame. Ignored unless the session is open.
    pub fn send_video_frame(&self, jpeg: &[u8]) -> bool {
        let mut shared = self.inner.lock();
        if shared.state != SessionState::Open {
            return false;
        }

        let sent = shared
            .resources
            .outbound
            .as_ref()
            .map(|outbound| outbound.send_video(jpeg))
            .unwrap_or(false);
        if sent {
            shared.video_frames_sent += 1;
        }
        sent
    }

    /// Attach a camera sampler owned by this session.
    ///
    /// Replaces any previous sampler. Returns `false` when no session is
    /// connecting or open.
    pub fn start_video(&self, source: Arc<dyn FrameSource>, config: VideoSamplerConfig) -> bool {
        let mut shared = self.inner.lock();
        if !shared.state.is_active() {
            return false;
        }

        let sink = Arc::new(SessionVideoSink {
            inner: Arc::downgrade(&self.inner),
        });
        shared.resources.video = Some(VideoFrameSampler::start(source, sink, config));
        true
    }

    async fn fail_connect(
        &self,
        generation: u64,
        err: SessionError,
    ) -> Result<ConnectOutcome, SessionError> {
        error!("Live session connect failed: {}", err);

        let (observer, resources) = {
            let mut shared = self.inner.lock();
            if shared.generation != generation {
                // A disconnect already released everything
                return Err(err);
            }
            let observer = shared.observer.take();
            (observer, shared.teardown(SessionState::Error))
        };

        resources.release().await;
        self.settle_error(generation + 1, observer.as_deref(), &err);
        Err(err)
    }

    /// Report an error once, then move from `Error` to `Closed`.
    fn settle_error(&self, generation: u64, observer: Option<&dyn SessionObserver>, err: &SessionError) {
        if let Some(observer) = observer {
            observer.on_error(err);
        }

        let mut shared = self.inner.lock();
        if shared.generation == generation && shared.state == SessionState::Error {
            shared.state = SessionState::Closed;
        }
    }

    /// Cleanup for a close or error initiated by the remote side
    async fn remote_teardown(&self, generation: u64, err: Option<SessionError>) {
        let (observer, mut resources) = {
            let mut shared = self.inner.lock();
            if shared.generation != generation {
                return;
            }
            let next = if err.is_some() {
                SessionState::Error
            } else {
                SessionState::Closed
            };
            let observer = shared.observer.take();
            (observer, shared.teardown(next))
        };

        // Called from the reader itself, which must not await its own handle
        drop(resources.reader.take());
        resources.release().await;

        match err {
            Some(err) => {
                error!("Live session error: {}", err);
                self.settle_error(generation + 1, observer.as_deref(), &err);
            }
            None => {
                info!("Live session closed by remote");
                if let Some(observer) = observer {
                    observer.on_close();
                }
            }
        }
    }

    /// Apply one inbound message: transcripts, then interruption, then turn
    /// completion, then audio.
    fn dispatch(&self, generation: u64, message: ServerMessage) {
        let event = message.into_event();
        let mut notifications = Vec::new();

        let observer = {
            let mut shared = self.inner.lock();
            if shared.generation != generation || shared.state != SessionState::Open {
                return;
            }

            if event.has_transcript() {
                if let Some(fragment) = &event.input_fragment {
                    shared.transcript.append_user(fragment);
                }
                if let Some(fragment) = &event.output_fragment {
                    shared.transcript.append_ai(fragment);
                }
                notifications.push(Notification::Transcript {
                    user: shared.transcript.user().to_string(),
                    ai: shared.transcript.ai().to_string(),
                });
            }

            if event.interrupted {
                shared.interruptions += 1;
                if let Some(playback) = shared.resources.playback.as_mut() {
                    playback.interrupt();
                }
                if shared.transcript.discard_ai() {
                    notifications.push(Notification::Transcript {
                        user: shared.transcript.user().to_string(),
                        ai: String::new(),
                    });
                }
            }

            if event.turn_complete {
                if let Some(turn) = shared.transcript.take_turn() {
                    shared.turns_completed += 1;
                    info!("Turn complete ({} turns)", shared.turns_completed);
                    notifications.push(Notification::TurnComplete(turn));
                }
            }

            let sample_rate = shared.output_sample_rate;
            for data in &event.audio {
                let buffer = match decode_inline_audio(data, sample_rate) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        warn!("Skipping inline audio: {:#}", e);
                        continue;
                    }
                };
                let Some(playback) = shared.resources.playback.as_mut() else {
                    break;
                };
                match playback.enqueue(&buffer) {
                    Ok(Some(_)) => shared.audio_chunks_received += 1,
                    Ok(None) => {}
                    Err(e) => warn!("Failed to schedule inline audio: {:#}", e),
                }
            }

            if event.audio.is_empty() && !event.text.is_empty() {
                warn!(
                    "{}; got text instead: {:?}",
                    SessionError::MissingResponse("audio".to_string()),
                    event.text.join(" ")
                );
            }

            shared.observer.clone()
        };

        let Some(observer) = observer else {
            return;
        };

        for notification in notifications {
            // The observer may have disconnected us from inside a callback
            if self.inner.lock().generation != generation {
                return;
            }
            match notification {
                Notification::Transcript { user, ai } => observer.on_transcript_update(&user, &ai),
                Notification::TurnComplete(turn) => observer.on_turn_complete(&turn),
            }
        }
    }
}

struct SessionVideoSink {
    inner: Weak<Inner>,
}

impl VideoSink for SessionVideoSink {
    fn send_video_frame(&self, jpeg: &[u8]) -> bool {
        match self.inner.upgrade() {
            Some(inner) => LiveSession { inner }.send_video_frame(jpeg),
            None => false,
        }
    }
}

fn decode_inline_audio(data: &str, sample_rate: u32) -> anyhow::Result<PlaybackBuffer> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("Inline audio is not valid base64")?;
    Ok(pcm::decode(&bytes, sample_rate, 1))
}

async fn stop_input(mut input: Box<dyn AudioBackend>) {
    if let Err(e) = input.stop().await {
        warn!("Failed to stop {}: {:#}", input.name(), e);
    }
}

/// Remove naturally finished sources from the playback queue
async fn pump_ended(inner: Weak<Inner>, generation: u64, mut ended: mpsc::UnboundedReceiver<SourceId>) {
    while let Some(id) = ended.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut shared = inner.lock();
        if shared.generation != generation {
            return;
        }
        if let Some(playback) = shared.resources.playback.as_mut() {
            playback.source_ended(id);
        }
    }
}

async fn run_reader(inner: Weak<Inner>, generation: u64, mut inbound: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let session = LiveSession { inner };

        match event {
            TransportEvent::Message(message) => session.dispatch(generation, message),
            TransportEvent::Error(message) => {
                session
                    .remote_teardown(generation, Some(SessionError::Transport(message)))
                    .await;
                return;
            }
            TransportEvent::Closed(reason) => {
                if let Some(reason) = reason.filter(|r| !r.is_empty()) {
                    info!("Remote closed the connection: {}", reason);
                }
                session.remote_teardown(generation, None).await;
                return;
            }
        }
    }

    // Transport went away without saying goodbye
    if let Some(inner) = inner.upgrade() {
        LiveSession { inner }.remote_teardown(generation, None).await;
    }
}
