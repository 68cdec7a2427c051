// Audio Configuration
// Protocol constants plus every tunable of the capture / playback pipeline.
// All fields carry serde defaults so a partial TOML file is enough.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Sample rate of outbound PCM frames
pub const PROTOCOL_CAPTURE_RATE: u32 = 16_000;

/// Nominal sample rate of inbound synthesized speech
pub const PROTOCOL_PLAYBACK_RATE: u32 = 24_000;

/// Device samples per capture tick (~128ms at 16kHz, ~43ms at 48kHz)
pub const CAPTURE_FRAME_SAMPLES: usize = 2048;

/// Ring buffer size in samples between the device callback and the DSP thread
/// At 48kHz = ~680ms of headroom
pub const RING_BUFFER_SAMPLES: usize = 32768;

/// DSP thread poll interval in milliseconds
pub const DSP_POLL_MS: u64 = 1;

/// Outbound items the writer may lag behind by (~8s of 128ms ticks)
pub const OUTBOUND_QUEUE_ITEMS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub noise_floor: NoiseFloorConfig,
    pub vad: VadConfig,
    pub barge_in: BargeInConfig,
    pub playback: PlaybackConfig,
    pub transcript: TranscriptConfig,
    pub transport: TransportConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture.target_rate == 0 || self.playback.inbound_rate == 0 {
            return Err(ConfigError::Invalid("sample rates must be positive".into()));
        }
        if self.capture.frame_samples == 0 || self.playback.pull_samples == 0 {
            return Err(ConfigError::Invalid("frame sizes must be positive".into()));
        }
        if self.noise_floor.min_samples == 0 || self.noise_floor.window < self.noise_floor.min_samples {
            return Err(ConfigError::Invalid(format!(
                "noise floor window ({}) must hold at least min_samples ({})",
                self.noise_floor.window, self.noise_floor.min_samples
            )));
        }
        if !(0.0..=1.0).contains(&self.noise_floor.percentile) {
            return Err(ConfigError::Invalid(format!(
                "noise floor percentile must be within [0, 1], got {}",
                self.noise_floor.percentile
            )));
        }
        if !(self.vad.release_ratio > 0.0 && self.vad.release_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "release_ratio must be within (0, 1], got {}",
                self.vad.release_ratio
            )));
        }
        if self.transport.control_headroom == 0
            || self.transport.outbound_queue_items <= self.transport.control_headroom
        {
            return Err(ConfigError::Invalid(format!(
                "outbound_queue_items ({}) must exceed a non-zero control_headroom ({})",
                self.transport.outbound_queue_items, self.transport.control_headroom
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Outbound protocol rate
    pub target_rate: u32,
    /// Device samples gathered per capture tick
    pub frame_samples: usize,
    pub ring_buffer_samples: usize,
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_rate: PROTOCOL_CAPTURE_RATE,
            frame_samples: CAPTURE_FRAME_SAMPLES,
            ring_buffer_samples: RING_BUFFER_SAMPLES,
            poll_interval_ms: DSP_POLL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NoiseFloorConfig {
    /// Rolling window capacity (oldest RMS evicted first)
    pub window: usize,
    /// Samples required before the estimate leaves zero
    pub min_samples: usize,
    /// Order statistic taken from the sorted window
    pub percentile: f32,
}

impl Default for NoiseFloorConfig {
    fn default() -> Self {
        Self {
            window: 8,
            min_samples: 4,
            percentile: 0.2,
        }
    }
}

/// VAD thresholds and timings. RMS values are on the normalised scale (full scale = 1.0).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Lower bound of the adaptive threshold
    pub min_threshold: f32,
    pub noise_multiplier: f32,
    pub noise_offset: f32,
    /// Added on top of the adaptive threshold to leave Idle
    pub start_offset: f32,
    /// Release threshold = adaptive threshold * release_ratio
    pub release_ratio: f32,
    pub min_speech_ms: f64,
    pub silence_timeout_ms: f64,
    /// Safety ceiling on one utterance
    pub max_speech_ms: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_threshold: 0.015,
            noise_multiplier: 2.5,
            noise_offset: 0.005,
            start_offset: 0.003,
            release_ratio: 0.6,
            min_speech_ms: 150.0,
            silence_timeout_ms: 500.0,
            max_speech_ms: 12_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    pub enabled: bool,
    /// Fixed floor; the live VAD start threshold wins when higher
    pub threshold: f32,
    /// Continuous loud capture required before playback is flushed
    pub sustain_ms: f64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.06,
            sustain_ms: 220.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate of inbound binary frames unless the device negotiates otherwise
    pub inbound_rate: u32,
    /// Samples pulled per output callback
    pub pull_samples: usize,
    /// Queued audio beyond this is rejected
    pub max_queued_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            inbound_rate: PROTOCOL_PLAYBACK_RATE,
            pull_samples: 2048,
            max_queued_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Final-fragment ids remembered per role for dedup
    pub max_seen_ids: usize,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self { max_seen_ids: 512 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Capacity of the queue feeding the websocket writer
    pub outbound_queue_items: usize,
    /// Slots only control messages may use; audio is dropped once the queue reaches them
    pub control_headroom: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_queue_items: OUTBOUND_QUEUE_ITEMS,
            control_headroom: 16,
        }
    }
}
