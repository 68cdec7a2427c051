// Noise Floor Estimator
// Fixed-capacity ring of recent frame RMS values; the estimate is a low
// percentile of the window (sort-on-read, the window is tiny).

use crate::audio_config::{NoiseFloorConfig, VadConfig};

/// Detection / release thresholds derived from the current floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// max(min_threshold, floor * multiplier + offset)
    pub adaptive: f32,
    /// Level that moves Idle -> Detecting and counts as speech
    pub start: f32,
    /// Below this a frame counts as silence. Always <= adaptive.
    pub release: f32,
}

impl Thresholds {
    pub fn from_floor(noise_floor: f32, config: &VadConfig) -> Self {
        let adaptive = config
            .min_threshold
            .max(noise_floor * config.noise_multiplier + config.noise_offset);
        Self {
            adaptive,
            start: adaptive + config.start_offset,
            release: adaptive * config.release_ratio,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NoiseFloor {
    window: Box<[f32]>,
    /// Next write slot
    head: usize,
    len: usize,
    min_samples: usize,
    percentile: f32,
    estimate: f32,
}

impl NoiseFloor {
    pub fn new(config: &NoiseFloorConfig) -> Self {
        Self {
            window: vec![0.0; config.window.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
            min_samples: config.min_samples,
            percentile: config.percentile,
            estimate: 0.0,
        }
    }

    /// Record one frame's RMS. Callers must not feed frames captured during active speech.
    pub fn observe(&mut self, rms: f32) {
        if !rms.is_finite() {
            return;
        }
        let capacity = self.window.len();
        self.window[self.head] = rms;
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);

        if self.len >= self.min_samples {
            self.estimate = self.percentile_of_window();
        }
    }

    /// Current floor, 0.0 until `min_samples` values were seen.
    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn thresholds(&self, config: &VadConfig) -> Thresholds {
        Thresholds::from_floor(self.estimate, config)
    }

    /// Window contents, oldest first.
    pub fn samples(&self) -> Vec<f32> {
        let capacity = self.window.len();
        let start = (self.head + capacity - self.len) % capacity;
        (0..self.len)
            .map(|i| self.window[(start + i) % capacity])
            .collect()
    }

    pub fn reset(&mut self) {
        self.head = 0;
        self.len = 0;
        self.estimate = 0.0;
    }

    fn percentile_of_window(&self) -> f32 {
        let mut sorted = self.window[..self.len].to_vec();
        sorted.sort_by(f32::total_cmp);
        let idx = ((sorted.len() - 1) as f32 * self.percentile).floor() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}
