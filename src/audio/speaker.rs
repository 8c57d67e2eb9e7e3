//! cpal speaker output with a sample-accurate scheduler.
//!
//! Every scheduled source is converted to mono at the device rate and stored
//! with its start frame. The output callback mixes whatever overlaps the
//! block being rendered, advances the frame clock, and reports sources that
//! finished on the `ended` channel.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::device::StreamGuard;
use super::pcm::PlaybackBuffer;
use super::playback::{PlaybackOutput, SourceId};
use super::resample::{resample_to_len, to_mono};

struct MixSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl MixSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Scheduled sources plus the frame clock, shared with the audio thread
pub struct Mixer {
    sources: Vec<MixSource>,
    frames_rendered: u64,
    ended: mpsc::UnboundedSender<SourceId>,
}

impl Mixer {
    pub fn new(ended: mpsc::UnboundedSender<SourceId>) -> Self {
        Self {
            sources: Vec::new(),
            frames_rendered: 0,
            ended,
        }
    }

    pub fn add(&mut self, id: SourceId, start_frame: u64, samples: Vec<f32>) {
        self.sources.push(MixSource {
            id,
            start_frame,
            samples,
        });
    }

    /// Drop a source without reporting it as ended.
    pub fn remove(&mut self, id: SourceId) {
        self.sources.retain(|source| source.id != id);
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn scheduled(&self) -> usize {
        self.sources.len()
    }

    /// Fill one interleaved output block and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        if channels == 0 {
            return;
        }

        let base = self.frames_rendered;
        let frames = (out.len() / channels) as u64;
        let block_end = base + frames;

        for source in &self.sources {
            let from = source.start_frame.max(base);
            let to = source.end_frame().min(block_end);
            for frame in from..to {
                let sample = source.samples[(frame - source.start_frame) as usize];
                let offset = (frame - base) as usize * channels;
                for slot in &mut out[offset..offset + channels] {
                    *slot += sample;
                }
            }
        }

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }

        self.frames_rendered = block_end;

        let ended = &self.ended;
        self.sources.retain(|source| {
            if source.end_frame() <= block_end {
                let _ = ended.send(source.id);
                false
            } else {
                true
            }
        });
    }
}

pub struct SpeakerOutput {
    mixer: Arc<Mutex<Mixer>>,
    device_rate: u32,
    guard: Option<StreamGuard>,
}

impl SpeakerOutput {
    /// Open the default output device, preferring `sample_rate`.
    ///
    /// Blocks the calling thread while the driver starts the stream, which
    /// takes a few milliseconds. Closing does not block.
    pub fn open(sample_rate: u32) -> Result<(Self, mpsc::UnboundedReceiver<SourceId>)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device found on the default audio host"))?;

        let (stream_config, sample_format) = pick_output_config(&device, sample_rate)?;
        let device_rate = stream_config.sample_rate.0;

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mixer = Arc::new(Mutex::new(Mixer::new(ended_tx)));

        let stream_mixer = Arc::clone(&mixer);
        let guard = StreamGuard::spawn("speaker", move || match sample_format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &stream_config, stream_mixer),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &stream_config, stream_mixer),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &stream_config, stream_mixer),
            other => bail!("Unsupported output sample format: {:?}", other),
        })
        .context("Failed to open speaker stream")?;

        info!("Speaker output opened at {}Hz", device_rate);

        Ok((
            Self {
                mixer,
                device_rate,
                guard: Some(guard),
            },
            ended_rx,
        ))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Mixer> {
        // A poisoned mixer only means the audio thread panicked mid-render
        self.mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PlaybackOutput for SpeakerOutput {
    fn current_time(&self) -> f64 {
        self.lock().frames_rendered() as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, id: SourceId, buffer: &PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.guard.is_none() {
            bail!("Speaker output is closed");
        }

        let mono = to_mono(&buffer.samples, buffer.channels);
        let (start_frame, frames) = frame_span(start_at, buffer.duration(), self.device_rate);
        let samples = resample_to_len(&mono, frames);

        self.lock().add(id, start_frame, samples);
        Ok(())
    }

    fn stop(&mut self, id: SourceId) {
        self.lock().remove(id);
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut guard) = self.guard.take() {
            self.lock().clear();
            guard.stop();
            info!("Speaker output closed");
        }
        Ok(())
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Start frame and length of a source on the device clock.
///
/// Both ends are rounded from the playback timeline, so a source that starts
/// where the previous one ended begins on exactly the frame the previous one
/// stopped at, whatever the device rate.
fn frame_span(start_at: f64, duration: f64, device_rate: u32) -> (u64, usize) {
    let rate = device_rate as f64;
    let start = (start_at * rate).round().max(0.0) as u64;
    let end = ((start_at + duration) * rate).round().max(0.0) as u64;
    (start, end.saturating_sub(start) as usize)
}

fn pick_output_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat)> {
    let mut ranges: Vec<_> = device
        .supported_output_configs()
        .context("Failed to query output configs")?
        .filter(|range| {
            range.min_sample_rate().0 <= preferred_rate && range.max_sample_rate().0 >= preferred_rate
        })
        .collect();
    ranges.sort_by_key(|range| range.channels());

    if let Some(range) = ranges.into_iter().next() {
        let supported = range.with_sample_rate(cpal::SampleRate(preferred_rate));
        let format = supported.sample_format();
        return Ok((supported.into(), format));
    }

    let fallback = device
        .default_output_config()
        .context("Failed to query default output config")?;
    warn!(
        "Speaker does not offer {}Hz, resampling to {}Hz",
        preferred_rate,
        fallback.sample_rate().0
    );
    let format = fallback.sample_format();
    Ok((fallback.into(), format))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mixer: Arc<Mutex<Mixer>>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            match mixer.lock() {
                Ok(mut mixer) => mixer.render(&mut scratch, channels),
                Err(_) => scratch.fill(0.0),
            }
            for (slot, &sample) in data.iter_mut().zip(scratch.iter()) {
                *slot = T::from_sample(sample);
            }
        },
        |err| {
            error!("Speaker stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}
