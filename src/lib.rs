#![deny(clippy::all)]

// Real-time duplex voice pipeline
//
// Capture:  cpal callback -> ring buffer -> DSP thread (resample, VAD, barge-in)
//           -> outbound queue -> websocket writer task
// Playback: websocket reader -> session receive loop -> playback queue
//           -> cpal output callback

pub mod audio_config;
pub mod backend;
pub mod barge_in;
pub mod capture;
pub mod codec;
pub mod error;
pub mod microphone;
pub mod noise_floor;
pub mod playback;
pub mod resampler;
pub mod session;
pub mod speaker;
pub mod transcript;
pub mod transport;
pub mod vad;

pub use audio_config::PipelineConfig;
pub use backend::{AudioBackend, CaptureSource, CpalBackend};
pub use codec::AudioFrame;
pub use error::{ConfigError, DeviceError, ProtocolError, SessionError, SessionResult, TransportError};
pub use microphone::list_input_devices;
pub use playback::{PlaybackConsumer, PlaybackStatus};
pub use session::{Session, SessionEvent, SessionStatus};
pub use speaker::list_output_devices;
pub use transcript::{Role, TranscriptUpdate};
pub use transport::DisconnectReason;
pub use vad::{VadEndReason, VadEvent, VadState};
