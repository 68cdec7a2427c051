// Capture Pipeline - DSP thread side
//
// Per tick (frame_samples device samples):
// 1. Resample to the protocol rate
// 2. RMS on the resampled frame
// 3. Thresholds from the current floor; the floor learns until speech is confirmed
// 4. VAD update -> optional start/end control event
// 5. Barge-in check against live playback occupancy
// 6. Encode to 16-bit PCM; the frame is always sent, whatever the VAD state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use tracing::{debug, error, info, warn};

use crate::audio_config::{PipelineConfig, VadConfig};
use crate::barge_in::BargeInDetector;
use crate::codec::{self, AudioFrame};
use crate::error::{DeviceError, TransportError};
use crate::noise_floor::NoiseFloor;
use crate::playback::PlaybackControl;
use crate::resampler::LinearResampler;
use crate::transport::TransportSender;
use crate::vad::{VadEvent, VadState, VoiceActivityDetector};

/// Mutated by the capture thread only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureContext {
    pub device_rate: u32,
    pub target_rate: u32,
    pub last_rms: f32,
}

/// Everything one capture tick produced.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub frame: AudioFrame,
    pub rms: f32,
    pub vad_event: Option<VadEvent>,
    /// Sustained speech over agent playback; the caller flushes the queue
    pub barge_in: bool,
}

pub struct CapturePipeline {
    context: CaptureContext,
    resampler: LinearResampler,
    noise_floor: NoiseFloor,
    vad: VoiceActivityDetector,
    barge_in: BargeInDetector,
    vad_config: VadConfig,
}

impl CapturePipeline {
    pub fn new(device_rate: u32, config: &PipelineConfig) -> Self {
        let target_rate = config.capture.target_rate;
        Self {
            context: CaptureContext {
                device_rate,
                target_rate,
                last_rms: 0.0,
            },
            resampler: LinearResampler::new(device_rate, target_rate),
            noise_floor: NoiseFloor::new(&config.noise_floor),
            vad: VoiceActivityDetector::new(config.vad.clone()),
            barge_in: BargeInDetector::new(config.barge_in.clone()),
            vad_config: config.vad.clone(),
        }
    }

    /// Run one tick of device-rate samples through the pipeline.
    pub fn process(&mut self, samples: &[f32], playback_active: bool) -> CaptureOutcome {
        let resampled = self.resampler.process(samples);
        let rms = codec::rms(&resampled);
        let frame_ms = samples.len() as f64 * 1000.0 / self.context.device_rate.max(1) as f64;

        // Thresholds come from the floor as it stood before this frame
        let thresholds = self.noise_floor.thresholds(&self.vad_config);
        if !self.vad.is_speech_active() {
            self.noise_floor.observe(rms);
        }

        let vad_event = self.vad.update(rms, frame_ms, &thresholds);
        let barge_in = self.barge_in.update(rms, frame_ms, playback_active, thresholds.start);
        self.context.last_rms = rms;

        CaptureOutcome {
            frame: AudioFrame::from_f32(&resampled, self.context.target_rate),
            rms,
            vad_event,
            barge_in,
        }
    }

    pub fn context(&self) -> &CaptureContext {
        &self.context
    }

    pub fn vad_state(&self) -> VadState {
        self.vad.state()
    }

    pub fn noise_floor(&self) -> &NoiseFloor {
        &self.noise_floor
    }

    pub fn reset(&mut self) {
        self.noise_floor.reset();
        self.vad.reset();
        self.barge_in.reset();
        self.context.last_rms = 0.0;
    }
}

/// DSP thread: drains the microphone ring, runs the pipeline, queues outbound items.
pub struct CaptureWorker {
    stop_signal: Arc<AtomicBool>,
    capture_thread: Option<thread::JoinHandle<()>>,
}

impl CaptureWorker {
    pub fn spawn(
        mut consumer: HeapCons<f32>,
        mut pipeline: CapturePipeline,
        frame_samples: usize,
        poll_interval: Duration,
        sender: TransportSender,
        playback: PlaybackControl,
    ) -> Result<Self, DeviceError> {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let frame_samples = frame_samples.max(1);

        let handle = thread::Builder::new()
            .name("capture-dsp".into())
            .spawn(move || {
                let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);
                let mut scratch = vec![0.0f32; frame_samples];
                let mut dropped: u64 = 0;

                info!(
                    device_rate = pipeline.context().device_rate,
                    target_rate = pipeline.context().target_rate,
                    frame_samples,
                    "capture thread started"
                );

                'outer: loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }

                    // 1. Drain ring buffer (lock-free)
                    let popped = consumer.pop_slice(&mut scratch);
                    pending.extend_from_slice(&scratch[..popped]);

                    // 2. Whole ticks only
                    while pending.len() >= frame_samples {
                        let outcome = pipeline.process(&pending[..frame_samples], playback.is_active());
                        pending.drain(..frame_samples);

                        if outcome.barge_in {
                            let flushed = playback.flush();
                            info!(flushed, rms = outcome.rms, "barge-in: playback flushed");
                        }

                        match sender.send_audio(outcome.frame) {
                            Ok(()) if dropped > 0 => {
                                info!(dropped, "outbound queue recovered");
                                dropped = 0;
                            }
                            Ok(()) => {}
                            Err(TransportError::QueueFull) => {
                                dropped += 1;
                                if dropped == 1 {
                                    warn!("outbound queue full, dropping capture frames");
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "outbound queue closed, stopping capture");
                                break 'outer;
                            }
                        }
                        if let Some(event) = outcome.vad_event {
                            match sender.send_control(event.into()) {
                                Ok(()) => {}
                                Err(TransportError::QueueFull) => {
                                    error!(?event, "outbound queue full, vad event lost");
                                }
                                Err(e) => {
                                    debug!(error = %e, "outbound queue closed, stopping capture");
                                    break 'outer;
                                }
                            }
                        }
                    }

                    // 3. Short sleep when the ring ran dry
                    if popped == 0 {
                        thread::sleep(poll_interval);
                    }
                }

                info!("capture thread stopped");
            })
            .context("failed to spawn capture thread")?;

        Ok(Self {
            stop_signal,
            capture_thread: Some(handle),
        })
    }

    /// Stop and join the DSP thread. Idempotent.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            if handle.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.capture_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
