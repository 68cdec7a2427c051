// Audio Backend
//
// The session only talks to devices through AudioBackend, so tests can
// drive the full pipeline with an in-memory backend.

use ringbuf::HeapCons;
use tracing::info;

use crate::error::DeviceError;
use crate::microphone::MicrophoneStream;
use crate::playback::PlaybackConsumer;
use crate::speaker::SpeakerOutput;

/// Mono f32 capture samples at the device rate.
pub struct CaptureSource {
    pub consumer: HeapCons<f32>,
    pub sample_rate: u32,
}

pub trait AudioBackend {
    /// Acquire the output device and report its native rate.
    fn output_rate(&mut self) -> Result<u32, DeviceError>;

    /// Start draining `consumer` into the output device.
    fn start_output(&mut self, consumer: PlaybackConsumer, pull_samples: usize) -> Result<(), DeviceError>;

    /// Start capture into a ring buffer of `ring_samples`.
    fn start_input(&mut self, ring_samples: usize) -> Result<CaptureSource, DeviceError>;

    /// Release every device. Safe to call more than once.
    fn close(&mut self);
}

/// Real devices through CPAL. Unknown device names fall back to the host default.
#[derive(Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
    microphone: Option<MicrophoneStream>,
    speaker: Option<SpeakerOutput>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
            ..Default::default()
        }
    }

    fn speaker(&mut self) -> Result<&mut SpeakerOutput, DeviceError> {
        if self.speaker.is_none() {
            self.speaker = Some(SpeakerOutput::new(self.output_device.as_deref())?);
        }
        self.speaker.as_mut().ok_or(DeviceError::NotFound("output"))
    }
}

impl AudioBackend for CpalBackend {
    fn output_rate(&mut self) -> Result<u32, DeviceError> {
        Ok(self.speaker()?.sample_rate())
    }

    fn start_output(&mut self, consumer: PlaybackConsumer, pull_samples: usize) -> Result<(), DeviceError> {
        self.speaker()?.start(consumer, pull_samples)
    }

    fn start_input(&mut self, ring_samples: usize) -> Result<CaptureSource, DeviceError> {
        let mut microphone = MicrophoneStream::new(self.input_device.as_deref(), ring_samples)?;
        let consumer = microphone.take_consumer().ok_or(DeviceError::NotFound("input"))?;
        microphone.play()?;
        let sample_rate = microphone.sample_rate();
        self.microphone = Some(microphone);
        Ok(CaptureSource { consumer, sample_rate })
    }

    fn close(&mut self) {
        if let Some(microphone) = self.microphone.take() {
            let _ = microphone.pause();
        }
        if let Some(speaker) = self.speaker.take() {
            let _ = speaker.pause();
        }
        info!("audio devices released");
    }
}
