// Websocket Client
//
// The socket is split: a writer task is the sole owner of the sink and drains a
// bounded queue fed by the capture thread and the session; the read half is
// polled by the session's receive loop.
//
// The last `control_headroom` queue slots are reserved for control messages.
// While the writer is stalled audio frames are dropped at the sender, so the
// queue never grows past its capacity and VAD edges still get through.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::audio_config::TransportConfig;
use crate::codec::AudioFrame;
use crate::error::TransportError;

use super::protocol::{decode_frame, ClientMessage, Inbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Item queued for the writer task
#[derive(Debug)]
pub enum Outbound {
    Audio(Vec<u8>),
    Control(ClientMessage),
}

/// Cheap cloneable handle onto the outbound queue. Never blocks.
#[derive(Clone)]
pub struct TransportSender {
    tx: mpsc::Sender<Outbound>,
    control_headroom: usize,
}

impl TransportSender {
    /// `QueueFull` means the frame was dropped because the writer is behind.
    pub fn send_audio(&self, frame: AudioFrame) -> Result<(), TransportError> {
        if self.tx.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.tx.capacity() <= self.control_headroom {
            return Err(TransportError::QueueFull);
        }
        self.send(Outbound::Audio(frame.to_le_bytes()))
    }

    pub fn send_control(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.send(Outbound::Control(message))
    }

    fn send(&self, item: Outbound) -> Result<(), TransportError> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outbound queue without a socket behind it; the writer task owns the receiver.
pub(crate) fn outbound_channel(config: &TransportConfig) -> (TransportSender, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(config.outbound_queue_items.max(1));
    let sender = TransportSender {
        tx,
        control_headroom: config.control_headroom,
    };
    (sender, rx)
}

/// Read half of the channel.
pub struct TransportReader {
    stream: Option<SplitStream<WsStream>>,
}

impl TransportReader {
    /// Next inbound item. `Ok(None)` once the stream ended or was closed locally.
    /// Malformed messages are logged and skipped.
    pub async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        loop {
            let Some(next) = stream.next().await else {
                self.stream = None;
                return Ok(None);
            };
            let msg = match next {
                Ok(msg) => msg,
                Err(e) => {
                    error!(error = %e, "websocket receive failed");
                    self.stream = None;
                    return Err(TransportError::Receive(e));
                }
            };
            match decode_frame(msg) {
                Ok(Some(inbound)) => return Ok(Some(inbound)),
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "dropping malformed inbound message");
                    continue;
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.stream = None;
    }
}

/// Handle on the writer task.
pub struct WriterTask {
    handle: Option<JoinHandle<Result<(), TransportError>>>,
}

impl WriterTask {
    /// Resolves when the writer stops: `Ok` after a clean close, `Err` on a send failure.
    /// Pending forever once already observed.
    pub async fn wait(&mut self) -> Result<(), TransportError> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.handle = None;
        match result {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "websocket writer task failed");
                Err(TransportError::Closed)
            }
        }
    }

    /// Give the writer `grace` to flush its close frame, then abort it.
    pub async fn finish(&mut self, grace: Duration) {
        let Some(mut handle) = self.handle.take() else {
            return;
        };
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(Err(e))) => debug!(error = %e, "writer ended with error during teardown"),
            Ok(_) => {}
            Err(_) => {
                warn!("websocket writer did not close in time, aborting");
                handle.abort();
            }
        }
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Open the duplex channel.
pub async fn connect(
    url: &str,
    config: &TransportConfig,
) -> Result<(TransportSender, TransportReader, WriterTask), TransportError> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(TransportError::Connect)?;
    info!(url, "duplex channel connected");

    let (sink, stream) = ws_stream.split();
    let (sender, rx) = outbound_channel(config);
    let handle = tokio::spawn(write_loop(sink, rx));

    Ok((
        sender,
        TransportReader { stream: Some(stream) },
        WriterTask { handle: Some(handle) },
    ))
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<(), TransportError> {
    while let Some(item) = rx.recv().await {
        let msg = match item {
            Outbound::Audio(bytes) => WsMessage::Binary(bytes),
            Outbound::Control(control) => WsMessage::Text(serde_json::to_string(&control)?),
        };
        if let Err(e) = sink.send(msg).await {
            error!(error = %e, "websocket send failed");
            return Err(TransportError::Send(e));
        }
    }

    debug!("outbound queue closed, closing websocket");
    if let Err(e) = sink.close().await {
        debug!(error = %e, "websocket close failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::protocol::VadSignal;

    fn small_queue() -> (TransportSender, mpsc::Receiver<Outbound>) {
        outbound_channel(&TransportConfig {
            outbound_queue_items: 4,
            control_headroom: 1,
        })
    }

    fn frame() -> AudioFrame {
        AudioFrame::new(vec![1, -1, 2, -2], 16_000)
    }

    fn start() -> ClientMessage {
        ClientMessage::Vad {
            state: VadSignal::Start,
        }
    }

    #[test]
    fn test_stalled_writer_drops_audio_but_keeps_control() {
        let (sender, mut rx) = small_queue();

        for _ in 0..3 {
            sender.send_audio(frame()).unwrap();
        }
        // Only the reserved slot is left
        for _ in 0..10 {
            assert!(matches!(sender.send_audio(frame()), Err(TransportError::QueueFull)));
        }
        sender.send_control(start()).unwrap();
        assert!(matches!(sender.send_control(start()), Err(TransportError::QueueFull)));

        let mut audio = 0;
        let mut controls = 0;
        while let Ok(item) = rx.try_recv() {
            match item {
                Outbound::Audio(bytes) => {
                    assert_eq!(bytes.len(), 8);
                    audio += 1;
                }
                Outbound::Control(message) => {
                    assert_eq!(message, start());
                    controls += 1;
                }
            }
        }
        assert_eq!((audio, controls), (3, 1));

        // Drained queue accepts audio again
        sender.send_audio(frame()).unwrap();
    }

    #[test]
    fn test_closed_queue_reports_closed() {
        let (sender, rx) = small_queue();
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(sender.send_audio(frame()), Err(TransportError::Closed)));
        assert!(matches!(sender.send_control(start()), Err(TransportError::Closed)));
    }
}
