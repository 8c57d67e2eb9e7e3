//! cpal microphone backend.
//!
//! Asks the default input device for the preferred rate and falls back to
//! the device default when that rate is not offered. Whatever the device
//! delivers is downmixed to mono and re-blocked into fixed-size frames.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::device::StreamGuard;
use super::resample::to_mono;

/// Collects arbitrarily sized device buffers into fixed-size blocks
#[derive(Debug)]
pub struct BlockAccumulator {
    block_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    emitted_samples: u64,
}

impl BlockAccumulator {
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            sample_rate,
            pending: Vec::with_capacity(block_size * 2),
            emitted_samples: 0,
        }
    }

    /// Append mono samples, returning every block completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let block = std::mem::replace(&mut self.pending, rest);

            let timestamp_ms = if self.sample_rate == 0 {
                0
            } else {
                self.emitted_samples * 1000 / self.sample_rate as u64
            };
            self.emitted_samples += block.len() as u64;

            frames.push(AudioFrame {
                samples: block,
                sample_rate: self.sample_rate,
                timestamp_ms,
            });
        }
        frames
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    device: cpal::Device,
    stream_config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    guard: Option<StreamGuard>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device found on the default audio host"))?;

        let (stream_config, sample_format) =
            pick_input_config(&device, config.preferred_sample_rate)?;

        info!(
            "Microphone backend initialized ({}Hz, {} channels, {:?})",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        Ok(Self {
            config,
            device,
            stream_config,
            sample_format,
            guard: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.guard.is_some() {
            bail!("Already capturing");
        }

        info!("Starting microphone capture");

        let (tx, rx) = mpsc::channel(self.config.frame_queue.max(1));
        let device = self.device.clone();
        let stream_config = self.stream_config.clone();
        let sample_format = self.sample_format;
        let block_size = self.config.block_size;

        // Opening the device waits on the driver; keep that off async workers
        let guard = tokio::task::spawn_blocking(move || {
            StreamGuard::spawn("microphone", move || match sample_format {
                cpal::SampleFormat::F32 => build_input::<f32>(&device, &stream_config, block_size, tx),
                cpal::SampleFormat::I16 => build_input::<i16>(&device, &stream_config, block_size, tx),
                cpal::SampleFormat::U16 => build_input::<u16>(&device, &stream_config, block_size, tx),
                other => bail!("Unsupported input sample format: {:?}", other),
            })
        })
        .await
        .context("Microphone startup task failed")?
        .context("Failed to open microphone stream")?;

        self.guard = Some(guard);

        info!("Microphone capture started");

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut guard) = self.guard.take() {
            info!("Stopping microphone capture");
            guard.stop();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.guard.as_ref().map(StreamGuard::is_running).unwrap_or(false)
    }

    fn sample_rate(&self) -> u32 {
        self.stream_config.sample_rate.0
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

fn pick_input_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat)> {
    let mut ranges: Vec<_> = device
        .supported_input_configs()
        .context("Failed to query input configs")?
        .filter(|range| {
            range.min_sample_rate().0 <= preferred_rate && range.max_sample_rate().0 >= preferred_rate
        })
        .collect();
    // Fewest channels first so mono wins when offered
    ranges.sort_by_key(|range| range.channels());

    if let Some(range) = ranges.into_iter().next() {
        let supported = range.with_sample_rate(cpal::SampleRate(preferred_rate));
        let format = supported.sample_format();
        return Ok((supported.into(), format));
    }

    let fallback = device
        .default_input_config()
        .context("Failed to query default input config")?;
    warn!(
        "Microphone does not offer {}Hz, falling back to {}Hz",
        preferred_rate,
        fallback.sample_rate().0
    );
    let format = fallback.sample_format();
    Ok((fallback.into(), format))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    block_size: usize,
    tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels;
    let mut accumulator = BlockAccumulator::new(block_size, config.sample_rate.0);
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            let mono = to_mono(&scratch, channels);

            for frame in accumulator.push(&mono) {
                // Recency over completeness: a full queue drops the block
                if tx.try_send(frame).is_err() {
                    trace!("Microphone frame dropped (consumer not ready)");
                }
            }
        },
        |err| {
            error!("Microphone stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}
