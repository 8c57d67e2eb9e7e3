//! Channel mixing and sample-rate conversion used at the device boundary.
//!
//! Both directions of the live pipeline are mono; cpal devices are not
//! always. The microphone side downmixes with [`to_mono`], the speaker side
//! fits each model chunk to its span on the device clock with
//! [`resample_to_len`].

/// Mix interleaved audio down to mono by averaging all channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Stretch or squeeze mono audio to exactly `output_len` samples with linear
/// interpolation.
///
/// Used when the output length is fixed by the caller, e.g. a chunk that must
/// end exactly where the next one starts on the device clock.
pub fn resample_to_len(samples: &[f32], output_len: usize) -> Vec<f32> {
    if samples.is_empty() || output_len == 0 {
        return Vec::new();
    }
    if output_len == samples.len() {
        return samples.to_vec();
    }

    let step = samples.len() as f64 / output_len as f64;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 * step;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}
