//! PCM conversions between wire bytes, i16 samples and f32 playback samples.

use crate::audio::types::PcmBuffer;
use crate::error::{EvaError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Serialize samples as little-endian 16-bit bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Parse little-endian 16-bit bytes into samples.
///
/// # Errors
/// Returns `EvaError::Decode` if the byte count is odd.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(EvaError::Decode {
            message: format!("odd PCM byte count: {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Base64 of the little-endian bytes of `samples`.
pub fn encode_base64(samples: &[i16]) -> String {
    BASE64.encode(samples_to_le_bytes(samples))
}

/// Decode a base64 16-bit mono PCM payload into a playable buffer.
///
/// # Errors
/// Returns `EvaError::Decode` for a zero sample rate, invalid base64, an odd
/// byte count or an empty payload.
pub fn decode_base64_pcm(data: &str, sample_rate: u32) -> Result<PcmBuffer> {
    if sample_rate == 0 {
        return Err(EvaError::Decode {
            message: "audio payload has a zero sample rate".to_string(),
        });
    }
    let bytes = BASE64.decode(data.trim()).map_err(|e| EvaError::Decode {
        message: format!("invalid base64: {}", e),
    })?;
    if bytes.is_empty() {
        return Err(EvaError::Decode {
            message: "empty audio payload".to_string(),
        });
    }
    let samples = le_bytes_to_samples(&bytes)?;
    Ok(PcmBuffer::new(i16_to_f32(&samples), sample_rate))
}

/// Convert i16 samples to f32 normalized to [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Convert f32 samples to i16, clamping out-of-range values.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Linear interpolation resampling for playback buffers.
pub fn resample_f32(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Mix interleaved multi-channel audio down to mono by averaging.
pub fn mix_to_mono(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
