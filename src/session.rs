// Session Lifecycle
//
// A Session owns every per-connection resource: the audio devices (through an
// AudioBackend), the capture worker, the playback queue, both transcript states
// and the transport handles. `run` drives the receive loop until the channel
// closes or fails or the session is cancelled, then tears everything down.
// Teardown is idempotent and also runs on drop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio_config::PipelineConfig;
use crate::backend::AudioBackend;
use crate::capture::{CapturePipeline, CaptureWorker};
use crate::codec::AudioFrame;
use crate::error::{DeviceError, SessionError, SessionResult, TransportError};
use crate::playback::{PlaybackControl, PlaybackProducer, PlaybackQueue, PlaybackStatus};
use crate::resampler::LinearResampler;
use crate::transcript::{TranscriptAggregator, TranscriptUpdate};
use crate::transport::{
    self, ClientMessage, DisconnectReason, Inbound, ServerMessage, TransportReader, TransportSender, WriterTask,
};

/// How long the writer gets to flush its close frame during teardown.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Listening,
    Speaking,
    /// Short user-facing reason
    Disconnected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    Transcript(TranscriptUpdate),
    /// Non-fatal server-side error text
    Notice(String),
}

struct AudioParts {
    capture: CaptureWorker,
    producer: PlaybackProducer,
    control: PlaybackControl,
    status_rx: mpsc::UnboundedReceiver<PlaybackStatus>,
    output_rate: u32,
}

pub struct Session<B: AudioBackend> {
    backend: B,
    config: PipelineConfig,
    sender: Option<TransportSender>,
    reader: TransportReader,
    writer: WriterTask,
    capture: Option<CaptureWorker>,
    playback: PlaybackProducer,
    playback_control: PlaybackControl,
    playback_status: mpsc::UnboundedReceiver<PlaybackStatus>,
    inbound_resampler: LinearResampler,
    transcripts: TranscriptAggregator,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    closed: bool,
}

impl<B: AudioBackend> Session<B> {
    /// Open the channel, then the devices. Any failure releases whatever was acquired.
    pub async fn connect(
        url: &str,
        config: PipelineConfig,
        mut backend: B,
    ) -> SessionResult<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (events, events_rx) = mpsc::unbounded_channel();
        let _ = events.send(SessionEvent::Status(SessionStatus::Connecting));

        if let Err(e) = config.validate() {
            let e = SessionError::from(e);
            let _ = events.send(SessionEvent::Status(SessionStatus::Disconnected(e.status_text().into())));
            return Err(e);
        }

        let (sender, mut reader, mut writer) = match transport::connect(url, &config.transport).await {
            Ok(parts) => parts,
            Err(e) => {
                error!(error = %e, url, "connect failed");
                let e = SessionError::from(e);
                let _ = events.send(SessionEvent::Status(SessionStatus::Disconnected(e.status_text().into())));
                return Err(e);
            }
        };

        let audio = match start_audio(&mut backend, &config, &sender) {
            Ok(audio) => audio,
            Err(e) => {
                error!(error = %e, "audio device setup failed, tearing down");
                backend.close();
                drop(sender);
                writer.finish(TEARDOWN_GRACE).await;
                reader.close();
                let e = SessionError::from(e);
                let _ = events.send(SessionEvent::Status(SessionStatus::Disconnected(e.status_text().into())));
                return Err(e);
            }
        };

        info!(output_rate = audio.output_rate, "session started");
        let session = Self {
            inbound_resampler: LinearResampler::new(config.playback.inbound_rate, audio.output_rate),
            transcripts: TranscriptAggregator::new(config.transcript.max_seen_ids),
            backend,
            config,
            sender: Some(sender),
            reader,
            writer,
            capture: Some(audio.capture),
            playback: audio.producer,
            playback_control: audio.control,
            playback_status: audio.status_rx,
            events,
            cancel: CancellationToken::new(),
            closed: false,
        };
        Ok((session, events_rx))
    }

    /// Receive loop. Returns why the session ended; transport failures come back as `Err`.
    /// Resources are released before this returns either way.
    pub async fn run(&mut self) -> SessionResult<DisconnectReason> {
        if self.closed {
            return Ok(DisconnectReason::Normal);
        }

        let outcome: SessionResult<DisconnectReason> = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ok(DisconnectReason::Cancelled),
                Some(status) = self.playback_status.recv() => self.on_playback_status(status),
                result = self.writer.wait() => match result {
                    Ok(()) => break Ok(DisconnectReason::Normal),
                    Err(e) => break Err(e.into()),
                },
                inbound = self.reader.recv() => match inbound {
                    Ok(Some(Inbound::Audio(bytes))) => self.on_audio(&bytes),
                    Ok(Some(Inbound::Message(message))) => self.on_message(message),
                    Ok(Some(Inbound::Closed(reason))) => break Ok(reason),
                    Ok(None) => break Ok(DisconnectReason::ConnectionLost),
                    Err(e) => break Err(e.into()),
                },
            }
        };

        let status_text = match &outcome {
            Ok(reason) => {
                info!(cause = ?reason, "session ended");
                reason.status_text()
            }
            Err(e) => {
                error!(error = %e, "session failed");
                e.status_text()
            }
        };
        self.shutdown().await;
        self.emit(SessionEvent::Status(SessionStatus::Disconnected(status_text.into())));
        outcome
    }

    /// Send typed user input. Blank text is ignored.
    pub fn send_text(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let sender = self.sender.as_ref().ok_or(TransportError::Closed)?;
        sender.send_control(ClientMessage::Text { text: text.to_owned() })?;
        Ok(())
    }

    /// Cancelling the token ends `run` with [`DisconnectReason::Cancelled`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn playback(&self) -> &PlaybackControl {
        &self.playback_control
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True while the DSP thread is alive.
    pub fn is_capturing(&self) -> bool {
        self.capture.as_ref().is_some_and(|capture| capture.is_running())
    }

    /// Stop capture and playback, release devices, clear queues and transcripts,
    /// close the channel. Safe to call any number of times.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.release();
        self.writer.finish(TEARDOWN_GRACE).await;
        self.reader.close();
        info!("session torn down");
    }

    /// Everything teardown does that needs no await.
    fn release(&mut self) {
        self.closed = true;
        self.cancel.cancel();
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.backend.close();
        self.playback_control.flush();
        self.transcripts.reset();
        // Last outbound handle: the writer sends a close frame once the queue drains
        self.sender = None;
    }

    fn emit(&self, event: SessionEvent) {
        // Receiver gone means nobody is watching; the session still runs
        let _ = self.events.send(event);
    }

    fn on_playback_status(&mut self, status: PlaybackStatus) {
        let status = match status {
            PlaybackStatus::Speaking => SessionStatus::Speaking,
            PlaybackStatus::Listening => SessionStatus::Listening,
        };
        self.emit(SessionEvent::Status(status));
    }

    fn on_audio(&mut self, bytes: &[u8]) {
        let frame = match AudioFrame::from_le_bytes(bytes, self.config.playback.inbound_rate) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed audio frame");
                return;
            }
        };
        let samples = self.inbound_resampler.process(&frame.to_f32());
        if !self.playback.push(samples) {
            debug!(bytes = bytes.len(), "inbound audio rejected by full playback queue");
        }
    }

    fn on_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Transcript(transcript) => {
                let kind = transcript.kind();
                if let Some(update) =
                    self.transcripts
                        .apply(transcript.role, kind, &transcript.text, transcript.id.as_deref())
                {
                    self.emit(SessionEvent::Transcript(update));
                }
            }
            ServerMessage::Status { state } => {
                debug!(state, "server status");
                if state == "ready" {
                    self.emit(SessionEvent::Status(SessionStatus::Listening));
                }
            }
            ServerMessage::Error { message } => {
                warn!(message, "server reported an error");
                self.emit(SessionEvent::Notice(message));
            }
            ServerMessage::Unknown => debug!("ignoring unknown message type"),
        }
    }
}

impl<B: AudioBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!("session dropped without shutdown, releasing resources");
        self.release();
        self.writer.abort();
        self.reader.close();
    }
}

fn start_audio<B: AudioBackend>(
    backend: &mut B,
    config: &PipelineConfig,
    sender: &TransportSender,
) -> Result<AudioParts, DeviceError> {
    let output_rate = backend.output_rate()?;
    let max_samples = (config.playback.max_queued_ms * output_rate as u64 / 1000) as usize;
    let (queue, status_rx) = PlaybackQueue::new(max_samples);
    let (producer, consumer, control) = queue.split();
    backend.start_output(consumer, config.playback.pull_samples)?;

    let source = backend.start_input(config.capture.ring_buffer_samples)?;
    let pipeline = CapturePipeline::new(source.sample_rate, config);
    let capture = CaptureWorker::spawn(
        source.consumer,
        pipeline,
        config.capture.frame_samples,
        Duration::from_millis(config.capture.poll_interval_ms),
        sender.clone(),
        control.clone(),
    )?;

    Ok(AudioParts {
        capture,
        producer,
        control,
        status_rx,
        output_rate,
    })
}
