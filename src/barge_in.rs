// Barge-In Detection
//
// Only armed while agent audio is queued for playback. Requires sustained
// capture energy above max(fixed threshold, live VAD start threshold);
// any quiet frame resets the accumulator, so clicks and coughs never interrupt.

use tracing::debug;

use crate::audio_config::BargeInConfig;

pub struct BargeInDetector {
    config: BargeInConfig,
    loud_ms: f64,
}

impl BargeInDetector {
    pub fn new(config: BargeInConfig) -> Self {
        Self { config, loud_ms: 0.0 }
    }

    /// Returns true exactly once per sustained interruption; the caller flushes playback.
    pub fn update(&mut self, rms: f32, frame_ms: f64, playback_active: bool, vad_start_threshold: f32) -> bool {
        if !self.config.enabled || !playback_active {
            self.loud_ms = 0.0;
            return false;
        }

        let threshold = self.config.threshold.max(vad_start_threshold);
        if rms < threshold {
            self.loud_ms = 0.0;
            return false;
        }

        self.loud_ms += frame_ms;
        if self.loud_ms >= self.config.sustain_ms {
            debug!(loud_ms = self.loud_ms, threshold, "barge-in sustained");
            self.loud_ms = 0.0;
            return true;
        }
        false
    }

    pub fn accumulated_ms(&self) -> f64 {
        self.loud_ms
    }

    pub fn reset(&mut self) {
        self.loud_ms = 0.0;
    }
}
