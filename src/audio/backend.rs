use anyhow::Result;
use tokio::sync::mpsc;

use super::playback::{PlaybackOutput, SourceId};

/// One fixed-size block of microphone audio (mono, `f32` in `[-1.0, 1.0]`)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples
    pub samples: Vec<f32>,
    /// Sample rate the device actually delivered, in Hz
    pub sample_rate: u32,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Configuration for the microphone backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Rate to ask the device for; the device default is used if unsupported
    pub preferred_sample_rate: u32,
    /// Samples per emitted frame
    pub block_size: usize,
    /// Frames buffered between the audio thread and the consumer before
    /// new frames are dropped
    pub frame_queue: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 16000, // Live endpoint input rate
            block_size: 4096,
            frame_queue: 8,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal microphone (all platforms)
/// - channel-fed fakes in tests
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio and release the hardware
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Rate frames will be tagged with
    fn sample_rate(&self) -> u32;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// An opened speaker plus the stream of "source ended" notifications
pub struct OutputHandle {
    pub output: Box<dyn PlaybackOutput>,
    pub ended: mpsc::UnboundedReceiver<SourceId>,
}

/// Opens the session's audio devices.
///
/// `open_output` is synchronous so a session can claim the speaker before
/// its first suspension point.
pub trait AudioDevices: Send + Sync {
    /// Open the speaker at (or as close as possible to) `sample_rate`
    fn open_output(&self, sample_rate: u32) -> Result<OutputHandle>;

    /// Prepare the microphone; capture begins on [`AudioBackend::start`]
    fn open_input(&self, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}
