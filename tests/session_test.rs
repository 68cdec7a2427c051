// End-to-end session tests against a local websocket server.
//
// The audio devices are replaced by an in-memory backend: capture samples are
// pushed straight into the ring buffer, playback is pulled by the test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duplex_voice::{
    AudioBackend, CaptureSource, DeviceError, DisconnectReason, PipelineConfig, PlaybackConsumer, Role, Session,
    SessionError, SessionEvent, SessionStatus, TranscriptUpdate,
};
use futures_util::{SinkExt, StreamExt};
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(10);
/// 50 ms at 16 kHz
const TICK: usize = 800;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.capture.frame_samples = TICK;
    config
}

#[derive(Clone, Default)]
struct FakeDevices {
    microphone: Arc<Mutex<Option<HeapProd<f32>>>>,
    speaker: Arc<Mutex<Option<PlaybackConsumer>>>,
    closes: Arc<AtomicUsize>,
}

struct FakeBackend {
    devices: FakeDevices,
    input_rate: u32,
    output_rate: u32,
    fail_input: bool,
}

impl FakeBackend {
    fn new(devices: &FakeDevices) -> Self {
        Self {
            devices: devices.clone(),
            input_rate: 16_000,
            output_rate: 24_000,
            fail_input: false,
        }
    }
}

impl AudioBackend for FakeBackend {
    fn output_rate(&mut self) -> Result<u32, DeviceError> {
        Ok(self.output_rate)
    }

    fn start_output(&mut self, consumer: PlaybackConsumer, _pull_samples: usize) -> Result<(), DeviceError> {
        *self.devices.speaker.lock().unwrap() = Some(consumer);
        Ok(())
    }

    fn start_input(&mut self, ring_samples: usize) -> Result<CaptureSource, DeviceError> {
        if self.fail_input {
            return Err(DeviceError::NotFound("input"));
        }
        let (producer, consumer) = HeapRb::<f32>::new(ring_samples).split();
        *self.devices.microphone.lock().unwrap() = Some(producer);
        Ok(CaptureSource {
            consumer,
            sample_rate: self.input_rate,
        })
    }

    fn close(&mut self) {
        self.devices.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestServer {
    url: String,
    received: mpsc::UnboundedReceiver<Message>,
}

/// Accept one client, send `script`, then forward everything the client sends.
async fn spawn_server(script: Vec<Message>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for msg in script {
            ws.send(msg).await.unwrap();
        }
        while let Some(Ok(msg)) = ws.next().await {
            if tx.send(msg).is_err() {
                break;
            }
        }
    });

    TestServer {
        url: format!("ws://{addr}"),
        received: rx,
    }
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

fn push_level(devices: &FakeDevices, level: f32, ticks: usize) {
    let mut guard = devices.microphone.lock().unwrap();
    let producer = guard.as_mut().expect("capture not started");
    let samples = vec![level; TICK * ticks];
    assert_eq!(producer.push_slice(&samples), samples.len());
}

#[tokio::test]
async fn test_vad_events_are_sent_between_continuous_audio_frames() {
    init_tracing();
    let mut server = spawn_server(Vec::new()).await;
    let devices = FakeDevices::default();
    let (mut session, _events) = Session::connect(&server.url, test_config(), FakeBackend::new(&devices))
        .await
        .unwrap();
    let cancel = session.cancel_token();

    // 200 ms silence, 300 ms speech, 600 ms silence
    push_level(&devices, 0.0, 4);
    push_level(&devices, 0.3, 6);
    push_level(&devices, 0.0, 12);

    let observe = async {
        let mut audio_frames = 0;
        let mut controls = Vec::new();
        loop {
            let msg = timeout(WAIT, server.received.recv()).await.unwrap().unwrap();
            match msg {
                Message::Binary(bytes) => {
                    assert_eq!(bytes.len(), TICK * 2);
                    audio_frames += 1;
                }
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let done = value["state"] == "end";
                    controls.push((audio_frames, value));
                    if done {
                        break;
                    }
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
        cancel.cancel();
        controls
    };

    let (result, controls) = tokio::join!(session.run(), observe);
    assert_eq!(result.unwrap(), DisconnectReason::Cancelled);
    assert_eq!(
        controls,
        vec![
            (7, json!({"type": "vad", "state": "start"})),
            (20, json!({"type": "vad", "state": "end"})),
        ]
    );
    assert_eq!(devices.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_inbound_audio_drives_speaking_and_listening() {
    init_tracing();
    let chunk: Vec<i16> = vec![8192; 2400];
    let server = spawn_server(vec![
        Message::Text(json!({"type": "status", "state": "ready"}).to_string()),
        Message::Binary(pcm_bytes(&chunk)),
    ])
    .await;
    let devices = FakeDevices::default();
    let (mut session, mut events) = Session::connect(&server.url, test_config(), FakeBackend::new(&devices))
        .await
        .unwrap();
    let cancel = session.cancel_token();

    let drive = async {
        assert_eq!(next_event(&mut events).await, SessionEvent::Status(SessionStatus::Connecting));
        assert_eq!(next_event(&mut events).await, SessionEvent::Status(SessionStatus::Listening));
        assert_eq!(next_event(&mut events).await, SessionEvent::Status(SessionStatus::Speaking));

        let mut out = vec![1.0f32; 3000];
        let written = {
            let mut guard = devices.speaker.lock().unwrap();
            guard.as_mut().expect("playback not started").fill(&mut out)
        };
        assert_eq!(written, 2400);
        assert!(out[..2400].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(out[2400..].iter().all(|&s| s == 0.0));

        assert_eq!(next_event(&mut events).await, SessionEvent::Status(SessionStatus::Listening));
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(session.run(), drive);
    assert_eq!(result.unwrap(), DisconnectReason::Cancelled);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Status(SessionStatus::Disconnected("Session ended".into()))
    );
}

#[tokio::test]
async fn test_server_messages_and_error_close() {
    init_tracing();
    let transcript = |role: &str, text: &str, is_final: bool, id: Option<&str>| {
        Message::Text(json!({"type": "transcript", "role": role, "text": text, "final": is_final, "id": id}).to_string())
    };
    let server = spawn_server(vec![
        transcript("user", "two pizzas", true, Some("u1")),
        transcript("user", "two pizzas", true, Some("u1")),
        transcript("user", " two   pizzas ", true, Some("u2")),
        Message::Text("{broken".into()),
        Message::Text(json!({"type": "tool_call", "name": "add_to_cart"}).to_string()),
        transcript("assistant", "Sure", false, None),
        transcript("assistant", " thing", false, None),
        transcript("assistant", " thing", false, None),
        Message::Text(json!({"type": "error", "message": "Item unavailable"}).to_string()),
        Message::Close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "".into(),
        })),
    ])
    .await;
    let devices = FakeDevices::default();
    let (mut session, mut events) = Session::connect(&server.url, test_config(), FakeBackend::new(&devices))
        .await
        .unwrap();

    let result = timeout(WAIT, session.run()).await.unwrap();
    assert_eq!(result.unwrap(), DisconnectReason::ServerError);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::Status(SessionStatus::Connecting),
            SessionEvent::Transcript(TranscriptUpdate {
                role: Role::User,
                text: "two pizzas".into(),
                is_final: true,
            }),
            SessionEvent::Transcript(TranscriptUpdate {
                role: Role::Assistant,
                text: "Sure".into(),
                is_final: false,
            }),
            SessionEvent::Transcript(TranscriptUpdate {
                role: Role::Assistant,
                text: "Sure thing".into(),
                is_final: false,
            }),
            SessionEvent::Notice("Item unavailable".into()),
            SessionEvent::Status(SessionStatus::Disconnected("Server error, please retry".into())),
        ]
    );
    assert!(session.is_closed());

    // Teardown already ran; repeating it is a no-op
    session.shutdown().await;
    assert_eq!(devices.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropped_connection_tears_down() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // No close frame, the TCP stream just goes away
        drop(ws);
    });

    let devices = FakeDevices::default();
    let (mut session, mut events) = Session::connect(&format!("ws://{addr}"), test_config(), FakeBackend::new(&devices))
        .await
        .unwrap();
    assert!(session.is_capturing());

    let result = timeout(WAIT, session.run()).await.unwrap();
    assert!(
        matches!(
            result,
            Ok(DisconnectReason::ConnectionLost) | Err(SessionError::Transport(_))
        ),
        "unexpected outcome {result:?}"
    );

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(SessionEvent::Status(SessionStatus::Disconnected("Connection lost".into())))
    );
    assert_eq!(devices.closes.load(Ordering::SeqCst), 1);
    assert!(session.is_closed());
    assert!(!session.is_capturing());
}

#[tokio::test]
async fn test_device_failure_tears_down_connect() {
    init_tracing();
    let server = spawn_server(Vec::new()).await;
    let devices = FakeDevices::default();
    let mut backend = FakeBackend::new(&devices);
    backend.fail_input = true;

    let err = match Session::connect(&server.url, test_config(), backend).await {
        Ok(_) => panic!("connect should fail without an input device"),
        Err(e) => e,
    };
    assert!(matches!(err, SessionError::Device(DeviceError::NotFound("input"))));
    assert_eq!(err.status_text(), "Microphone or speaker unavailable, please retry");
    assert_eq!(devices.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    init_tracing();
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let devices = FakeDevices::default();
    let result = Session::connect(&format!("ws://{addr}"), test_config(), FakeBackend::new(&devices)).await;
    let Err(err) = result else {
        panic!("connect should fail");
    };
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(err.status_text(), "Connection lost");
}

#[tokio::test]
async fn test_send_text_reaches_server() {
    init_tracing();
    let mut server = spawn_server(Vec::new()).await;
    let devices = FakeDevices::default();
    let (mut session, _events) = Session::connect(&server.url, test_config(), FakeBackend::new(&devices))
        .await
        .unwrap();

    session.send_text("   ").unwrap();
    session.send_text("  two pizzas please ").unwrap();

    let msg = timeout(WAIT, server.received.recv()).await.unwrap().unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({"type": "text", "text": "two pizzas please"}));

    session.shutdown().await;
    assert!(session.send_text("hello").is_err());
}
