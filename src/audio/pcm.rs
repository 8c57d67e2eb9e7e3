//! 16-bit little-endian PCM codec.
//!
//! Outbound microphone blocks are `f32` in `[-1.0, 1.0]` and leave as PCM
//! bytes; inbound model audio arrives as PCM bytes and becomes a
//! [`PlaybackBuffer`] the playback queue can schedule.

use anyhow::{Context, Result};
use std::io::Cursor;

/// Scale between normalized float samples and signed 16-bit integers.
pub const PCM_SCALE: f32 = 32768.0;

/// A block of encoded PCM plus the rate it was captured or produced at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    /// Raw 16-bit little-endian mono samples
    pub data: Vec<u8>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PcmChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }

    /// Mime type understood by the live endpoint, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Number of 16-bit samples carried (a dangling odd byte is not counted).
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }
}

/// Decoded audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Interleaved samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl PlaybackBuffer {
    /// Number of sample frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count() == 0
    }
}

/// Encode float samples to 16-bit little-endian PCM.
///
/// Each sample is scaled by 32768 and truncated toward zero. The float to
/// integer conversion saturates, so `1.0` becomes `32767` and anything outside
/// `[-1.0, 1.0]` clamps instead of wrapping around.
pub fn encode(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * PCM_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode 16-bit little-endian PCM into a playable buffer.
///
/// A trailing odd byte is ignored, as is any partial frame when
/// `channels > 1`. Empty input yields an empty buffer.
pub fn decode(bytes: &[u8], sample_rate: u32, channels: u16) -> PlaybackBuffer {
    let channels = channels.max(1);
    let mut samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM_SCALE)
        .collect();

    let whole_frames = samples.len() / channels as usize;
    samples.truncate(whole_frames * channels as usize);

    PlaybackBuffer {
        samples,
        sample_rate,
        channels,
    }
}

/// Wrap mono 16-bit PCM in a RIFF/WAVE container (44-byte header).
///
/// Used for single-utterance pronunciation audio, not for the realtime path.
/// A trailing odd byte is dropped so the data chunk holds whole samples.
pub fn wrap_in_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to start WAV container")?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .context("Failed to write sample to WAV")?;
        }
        writer.finalize().context("Failed to finalize WAV container")?;
    }

    Ok(cursor.into_inner())
}
