// Channel-backed fakes for the audio devices and the remote endpoint.
//
// Every fake records what the session did to it so tests can assert on
// device lifetime without touching real hardware or the network.

#![allow(dead_code)]

use anyhow::{bail, Result};
use base64::Engine;
use lingopop::audio::{
    AudioBackend, AudioBackendConfig, AudioDevices, AudioFrame, OutputHandle, PlaybackBuffer,
    PlaybackOutput, SourceId,
};
use lingopop::live::{
    LiveConnection, LiveConnector, Outgoing, OutboundSink, ServerMessage, SetupMessage,
    TransportEvent,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

// ============================================================================
// Audio devices
// ============================================================================

#[derive(Debug, Default)]
pub struct OutputLog {
    pub now: f64,
    pub scheduled: Vec<(SourceId, f64, f64)>,
    pub stopped: Vec<SourceId>,
    pub closed: bool,
}

pub struct FakeOutput {
    log: Arc<Mutex<OutputLog>>,
}

impl PlaybackOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.log.lock().unwrap().now
    }

    fn schedule(&mut self, id: SourceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .scheduled
            .push((id, start_at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.log.lock().unwrap().stopped.push(id);
    }

    fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BackendLog {
    pub started: bool,
    pub stopped: bool,
    pub frames: Option<mpsc::Sender<AudioFrame>>,
}

pub struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
    sample_rate: u32,
}

#[async_trait::async_trait]
impl AudioBackend for FakeBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        let mut log = self.log.lock().unwrap();
        log.started = true;
        log.frames = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.stopped = true;
        log.frames = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        let log = self.log.lock().unwrap();
        log.started && !log.stopped
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "fake microphone"
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub output: Arc<Mutex<OutputLog>>,
    pub backend: Arc<Mutex<BackendLog>>,
    pub outputs_opened: AtomicUsize,
    pub inputs_opened: AtomicUsize,
    pub fail_output: AtomicBool,
    pub fail_input: AtomicBool,
    ended: Mutex<Option<mpsc::UnboundedSender<SourceId>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_clock(&self, now: f64) {
        self.output.lock().unwrap().now = now;
    }

    pub fn output_closed(&self) -> bool {
        self.output.lock().unwrap().closed
    }

    pub fn input_stopped(&self) -> bool {
        self.backend.lock().unwrap().stopped
    }

    pub fn scheduled(&self) -> Vec<(SourceId, f64, f64)> {
        self.output.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.output.lock().unwrap().stopped.clone()
    }

    /// Feed one microphone block as if the device produced it
    pub fn push_frame(&self, samples: Vec<f32>) -> bool {
        let sender = self.backend.lock().unwrap().frames.clone();
        match sender {
            Some(tx) => tx
                .try_send(AudioFrame {
                    samples,
                    sample_rate: 16_000,
                    timestamp_ms: 0,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl AudioDevices for FakeDevices {
    fn open_output(&self, _sample_rate: u32) -> Result<OutputHandle> {
        if self.fail_output.load(Ordering::SeqCst) {
            bail!("speaker permission denied");
        }
        self.outputs_opened.fetch_add(1, Ordering::SeqCst);

        let mut log = self.output.lock().unwrap();
        log.closed = false;
        drop(log);

        let (ended_tx, ended) = mpsc::unbounded_channel();
        *self.ended.lock().unwrap() = Some(ended_tx);

        Ok(OutputHandle {
            output: Box::new(FakeOutput {
                log: Arc::clone(&self.output),
            }),
            ended,
        })
    }

    fn open_input(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        if self.fail_input.load(Ordering::SeqCst) {
            bail!("microphone permission denied");
        }
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);

        *self.backend.lock().unwrap() = BackendLog::default();

        Ok(Box::new(FakeBackend {
            log: Arc::clone(&self.backend),
            sample_rate: config.preferred_sample_rate,
        }))
    }
}

// ============================================================================
// Remote endpoint
// ============================================================================

/// The far end of one fake connection
pub struct Remote {
    pub setup: SetupMessage,
    pub outgoing: mpsc::Receiver<Outgoing>,
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl Remote {
    pub async fn send_json(&self, json: &str) {
        let message: ServerMessage = serde_json::from_str(json).unwrap();
        self.inbound
            .send(TransportEvent::Message(message))
            .await
            .unwrap();
    }

    pub async fn send_event(&self, event: TransportEvent) {
        self.inbound.send(event).await.unwrap();
    }

    /// Next outbound frame, skipping microphone audio
    pub async fn next_non_audio(&mut self) -> Option<Outgoing> {
        loop {
            let outgoing = tokio::time::timeout(Duration::from_secs(2), self.outgoing.recv())
                .await
                .ok()??;
            let is_audio = match &outgoing {
                Outgoing::Message(msg) => serde_json::to_string(msg)
                    .map(|json| json.contains("audio/pcm"))
                    .unwrap_or(false),
                Outgoing::Close => false,
            };
            if !is_audio {
                return Some(outgoing);
            }
        }
    }
}

pub struct FakeConnector {
    pub connects: AtomicUsize,
    pub fail: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    remotes: mpsc::UnboundedSender<Remote>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        Self::build(None)
    }

    /// Connector whose connects wait until the returned semaphore gets a permit
    pub fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let (connector, remotes) = Self::build(Some(Arc::clone(&gate)));
        (connector, remotes, gate)
    }

    fn build(gate: Option<Arc<Semaphore>>) -> (Arc<Self>, mpsc::UnboundedReceiver<Remote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate,
                remotes: tx,
            }),
            rx,
        )
    }
}

#[async_trait::async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, setup: SetupMessage) -> Result<LiveConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        if self.fail.load(Ordering::SeqCst) {
            bail!("handshake rejected");
        }

        let (outbound, outgoing) = OutboundSink::channel(32);
        let (inbound_tx, inbound) = mpsc::channel(32);

        let _ = self.remotes.send(Remote {
            setup,
            outgoing,
            inbound: inbound_tx,
        });

        Ok(LiveConnection::new(outbound, inbound))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Base64 of `samples` zeroed 16-bit samples
pub fn silent_audio(samples: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; samples * 2])
}

/// Poll until `condition` holds or two seconds pass
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
