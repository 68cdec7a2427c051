// Frame Codec
// Normalised f32 <-> 16-bit PCM, little-endian byte packing, RMS.
// Sample i always maps to sample i.

use crate::error::ProtocolError;

/// Mono 16-bit PCM frame. Moved between stages, never shared mutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Encode normalised samples into a frame.
    pub fn from_f32(samples: &[f32], sample_rate: u32) -> Self {
        Self::new(samples.iter().copied().map(encode_sample).collect(), sample_rate)
    }

    /// Parse little-endian PCM bytes.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self, ProtocolError> {
        Ok(Self::new(decode_le_bytes(bytes)?, sample_rate))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Always mono
    pub fn channels(&self) -> u16 {
        1
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().copied().map(decode_sample).collect()
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut pcm_bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            pcm_bytes.extend_from_slice(&sample.to_le_bytes());
        }
        pcm_bytes
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// Asymmetric scaling: negatives by 32768, non-negatives by 32767, so neither end overflows.
pub fn encode_sample(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

pub fn decode_le_bytes(bytes: &[u8]) -> Result<Vec<i16>, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::OddPcmByteLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Root-mean-square of normalised samples. Zero for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_of_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_of_squares / samples.len() as f64).sqrt() as f32
}
