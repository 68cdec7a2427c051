// Duplex transport: binary PCM frames and JSON control messages over one websocket

pub mod client;
pub mod protocol;

pub use client::{connect, Outbound, TransportReader, TransportSender, WriterTask};
pub(crate) use client::outbound_channel;
pub use protocol::{
    decode_frame, ClientMessage, DisconnectReason, Inbound, ServerMessage, TranscriptMessage,
    VadSignal,
};
