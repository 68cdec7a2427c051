// Voice Activity Detection
//
// Hysteresis state machine driven by per-frame RMS against thresholds derived
// from the noise floor. It does NOT gate outbound audio: every capture frame is
// streamed regardless of state. Only the vad start/end control events come from here.
//
// Time is accumulated from frame durations, not wall clock, so a given RMS
// sequence always yields the same events.

use tracing::{debug, info, warn};

use crate::audio_config::VadConfig;
use crate::noise_floor::Thresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    /// Above start threshold, not yet long enough to count as speech
    Detecting,
    Active,
    /// Active, currently accumulating silence
    Releasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEndReason {
    Silence,
    /// Forced stop after the maximum utterance length
    SafetyCutoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    Start,
    End(VadEndReason),
}

pub struct VoiceActivityDetector {
    config: VadConfig,
    state: VadState,
    speech_ms: f64,
    silence_ms: f64,
    total_activity_ms: f64,
    signal_sent: bool,
    pub last_rms: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Idle,
            speech_ms: 0.0,
            silence_ms: 0.0,
            total_activity_ms: 0.0,
            signal_sent: false,
            last_rms: 0.0,
        }
    }

    /// Feed one frame. Returns the control event this frame produced, if any.
    pub fn update(&mut self, rms: f32, frame_ms: f64, thresholds: &Thresholds) -> Option<VadEvent> {
        self.last_rms = rms;

        match self.state {
            VadState::Idle => {
                if rms >= thresholds.start {
                    self.state = VadState::Detecting;
                    self.speech_ms = frame_ms;
                    self.total_activity_ms = frame_ms;
                    self.silence_ms = 0.0;
                    debug!(rms, start = thresholds.start, "speech candidate");
                    return self.try_promote(rms);
                }
                None
            }
            VadState::Detecting => {
                if rms >= thresholds.start {
                    self.speech_ms += frame_ms;
                    self.total_activity_ms += frame_ms;
                    self.try_promote(rms)
                } else if rms < thresholds.release {
                    // Short burst: back to Idle without any event
                    debug!(speech_ms = self.speech_ms, "speech candidate dropped");
                    self.reset();
                    None
                } else {
                    self.total_activity_ms += frame_ms;
                    None
                }
            }
            VadState::Active | VadState::Releasing => {
                self.total_activity_ms += frame_ms;
                if rms >= thresholds.start {
                    self.speech_ms += frame_ms;
                    self.silence_ms = 0.0;
                    self.state = VadState::Active;
                } else if rms < thresholds.release {
                    self.silence_ms += frame_ms;
                    self.state = VadState::Releasing;
                }

                if self.silence_ms >= self.config.silence_timeout_ms {
                    return self.finish(VadEndReason::Silence);
                }
                if self.signal_sent && self.total_activity_ms >= self.config.max_speech_ms {
                    return self.finish(VadEndReason::SafetyCutoff);
                }
                None
            }
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Active or Releasing: the noise floor must not learn from these frames.
    pub fn is_speech_active(&self) -> bool {
        matches!(self.state, VadState::Active | VadState::Releasing)
    }

    pub fn is_idle(&self) -> bool {
        self.state == VadState::Idle
    }

    pub fn speech_ms(&self) -> f64 {
        self.speech_ms
    }

    pub fn silence_ms(&self) -> f64 {
        self.silence_ms
    }

    pub fn total_activity_ms(&self) -> f64 {
        self.total_activity_ms
    }

    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.speech_ms = 0.0;
        self.silence_ms = 0.0;
        self.total_activity_ms = 0.0;
        self.signal_sent = false;
    }

    fn try_promote(&mut self, rms: f32) -> Option<VadEvent> {
        if self.speech_ms >= self.config.min_speech_ms && !self.signal_sent {
            self.signal_sent = true;
            self.state = VadState::Active;
            info!(rms, speech_ms = self.speech_ms, "voice start");
            return Some(VadEvent::Start);
        }
        None
    }

    fn finish(&mut self, reason: VadEndReason) -> Option<VadEvent> {
        let was_signalled = self.signal_sent;
        match reason {
            VadEndReason::Silence => info!(
                reason = "silence",
                speech_ms = self.speech_ms,
                total_ms = self.total_activity_ms,
                "voice end"
            ),
            VadEndReason::SafetyCutoff => {
                warn!(
                    reason = "safety_cutoff",
                    total_ms = self.total_activity_ms,
                    "forced stop: maximum speech duration reached"
                );
            }
        }
        self.reset();
        was_signalled.then_some(VadEvent::End(reason))
    }
}
