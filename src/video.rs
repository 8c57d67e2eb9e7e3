//! Low-rate camera sampling for visual grounding.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shortest tick the sampler accepts
const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Anything that can hand out the most recent camera frame
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Option<RgbImage>;
}

/// Receives compressed frames; returns whether the frame was forwarded
pub trait VideoSink: Send + Sync {
    fn send_video_frame(&self, jpeg: &[u8]) -> bool;
}

/// Latest-frame slot written by a capture thread and read by the sampler
#[derive(Debug, Clone, Default)]
pub struct SharedFrame {
    slot: Arc<Mutex<Option<RgbImage>>>,
}

impl SharedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: RgbImage) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(frame);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

impl FrameSource for SharedFrame {
    fn latest_frame(&self) -> Option<RgbImage> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

#[derive(Debug, Clone)]
pub struct VideoSamplerConfig {
    pub interval: Duration,
    /// Frames wider than this are downscaled, keeping the aspect ratio
    pub max_width: u32,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
}

impl Default for VideoSamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_width: 640,
            jpeg_quality: 60,
        }
    }
}

/// Downscale and compress one frame.
///
/// Returns `Ok(None)` for a frame with no pixels (camera not producing yet).
pub fn encode_frame(frame: &RgbImage, config: &VideoSamplerConfig) -> Result<Option<Vec<u8>>> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let max_width = config.max_width.max(1);
    let resized;
    let frame = if width > max_width {
        let scaled_height = ((height as f64 * max_width as f64 / width as f64).round() as u32).max(1);
        resized = image::imageops::resize(frame, max_width, scaled_height, FilterType::Triangle);
        &resized
    } else {
        frame
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut Cursor::new(&mut jpeg), config.jpeg_quality.clamp(1, 100))
        .encode_image(frame)
        .context("Failed to encode video frame")?;

    Ok(Some(jpeg))
}

/// Samples a [`FrameSource`] on a fixed interval and forwards JPEGs.
///
/// The first sample is taken one interval after start. Nothing fires after
/// [`stop`](Self::stop) returns or the sampler is dropped.
pub struct VideoFrameSampler {
    task: Option<JoinHandle<()>>,
    frames_sent: Arc<AtomicU64>,
}

impl VideoFrameSampler {
    pub fn start(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn VideoSink>,
        config: VideoSamplerConfig,
    ) -> Self {
        let period = config.interval.max(MIN_INTERVAL);
        let frames_sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&frames_sent);

        info!(
            "Video sampler started (every {:?}, max width {})",
            period, config.max_width
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(frame) = source.latest_frame() else {
                    continue;
                };

                match encode_frame(&frame, &config) {
                    Ok(Some(jpeg)) => {
                        if sink.send_video_frame(&jpeg) {
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(None) => debug!("Video source has no frame yet, skipping tick"),
                    Err(e) => warn!("Skipping video frame: {:#}", e),
                }
            }
        });

        Self {
            task: Some(task),
            frames_sent,
        }
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Cancel the interval. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            info!("Video sampler stopped ({} frames sent)", self.frames_sent());
        }
    }
}

impl Drop for VideoFrameSampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
