// Wire Protocol
//
// Binary frames carry little-endian 16-bit mono PCM in both directions.
// Text frames carry JSON objects discriminated by `type`.

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ProtocolError;
use crate::transcript::{FragmentKind, Role};
use crate::vad::VadEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadSignal {
    Start,
    End,
}

/// Outbound text frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `{"type":"vad","state":"start"|"end"}`
    Vad { state: VadSignal },
    /// Typed user input, `{"type":"text","text":...}`
    Text { text: String },
}

impl From<VadEvent> for ClientMessage {
    fn from(event: VadEvent) -> Self {
        let state = match event {
            VadEvent::Start => VadSignal::Start,
            VadEvent::End(_) => VadSignal::End,
        };
        ClientMessage::Vad { state }
    }
}

/// Inbound text frames. Unknown `type` values parse as [`ServerMessage::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Transcript(TranscriptMessage),
    /// Session lifecycle; `"ready"` means the remote side is listening.
    Status { state: String },
    /// Non-fatal; surfaced as status text.
    Error { message: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    #[serde(default)]
    pub text: String,
    /// Absent means final.
    #[serde(rename = "final", default = "default_final")]
    pub is_final: bool,
    /// `false` together with `final:false` marks a full-replace snapshot.
    #[serde(default)]
    pub delta: Option<bool>,
    #[serde(default)]
    pub id: Option<String>,
}

fn default_final() -> bool {
    true
}

impl TranscriptMessage {
    pub fn kind(&self) -> FragmentKind {
        match (self.is_final, self.delta) {
            (true, _) => FragmentKind::Final,
            (false, Some(false)) => FragmentKind::Snapshot,
            (false, _) => FragmentKind::Delta,
        }
    }
}

/// Why the channel closed, mapped to short user-facing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// 1000 or a local close
    Normal,
    /// Session cancelled by its owner
    Cancelled,
    /// 1006, or the stream ended without a close frame
    ConnectionLost,
    /// 1011
    ServerError,
    /// 1013
    ServerBusy,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_close_code(code: u16) -> Self {
        match code {
            1000 => DisconnectReason::Normal,
            1006 => DisconnectReason::ConnectionLost,
            1011 => DisconnectReason::ServerError,
            1013 => DisconnectReason::ServerBusy,
            other => DisconnectReason::Other(other),
        }
    }

    pub fn status_text(&self) -> &'static str {
        match self {
            DisconnectReason::Normal | DisconnectReason::Cancelled => "Session ended",
            DisconnectReason::ConnectionLost => "Connection lost",
            DisconnectReason::ServerError => "Server error, please retry",
            DisconnectReason::ServerBusy => "Server busy, please retry later",
            DisconnectReason::Other(_) => "Disconnected, please retry",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, DisconnectReason::Normal | DisconnectReason::Cancelled)
    }
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Audio(Vec<u8>),
    Message(ServerMessage),
    Closed(DisconnectReason),
}

/// Decode a websocket frame. Control frames (ping/pong) yield `Ok(None)`.
pub fn decode_frame(msg: Message) -> Result<Option<Inbound>, ProtocolError> {
    match msg {
        Message::Binary(bytes) => {
            if bytes.len() % 2 != 0 {
                return Err(ProtocolError::OddPcmByteLength(bytes.len()));
            }
            Ok(Some(Inbound::Audio(bytes)))
        }
        Message::Text(text) => Ok(Some(Inbound::Message(serde_json::from_str(&text)?))),
        Message::Close(frame) => {
            // No close frame at all is the 1005 "no status" case
            let code = frame.map(|f| u16::from(f.code)).unwrap_or(u16::from(CloseCode::Status));
            Ok(Some(Inbound::Closed(DisconnectReason::from_close_code(code))))
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(None),
    }
}
