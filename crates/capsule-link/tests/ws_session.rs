//! End-to-end tests against a local STOMP-over-WebSocket server.
//!
//! The server is a few lines of `tokio-tungstenite` that answer the
//! handshake, echo one MESSAGE per SUBSCRIBE and record what they received.

use std::time::Duration;

use capsule_link::{
    Command, ConnectRequest, ConnectionRegistry, ConnectionState, Connector, Frame, FrameDecoder,
    Headers, RegistryConfig, RegistryError, TransportEvent, TransportFailure, WsConnector,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::Message;

const TOKEN: &str = "a.b.c";
const ENDPOINT: &str = "/ws-capsule-content";
const WAIT: Duration = Duration::from_secs(5);

/// What the server saw during one session.
#[derive(Debug, Default)]
struct Observed {
    path: String,
    authorization: Option<String>,
    frames: Vec<Frame>,
}

async fn next_frame(ws: &mut WebSocketStream<TcpStream>, decoder: &mut FrameDecoder) -> Option<Frame> {
    loop {
        if let Some(frame) = decoder.next_frame().unwrap() {
            return Some(frame);
        }
        match ws.next().await? {
            Ok(Message::Text(text)) => decoder.push(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => decoder.push(&data),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn send_frame(ws: &mut WebSocketStream<TcpStream>, frame: &Frame) {
    ws.send(Message::Text(frame.encode_text().unwrap().into()))
        .await
        .unwrap();
}

/// Accept one connection and play a well-behaved STOMP broker until the
/// client sends DISCONNECT or goes away.
async fn broker(listener: TcpListener, reject: bool) -> Observed {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut observed = Observed::default();
    let mut ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        observed.path = req.uri().path().to_string();
        observed.authorization = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(resp)
    })
    .await
    .unwrap();

    let mut decoder = FrameDecoder::new(64 * 1024);
    while let Some(frame) = next_frame(&mut ws, &mut decoder).await {
        let reply = match frame.command {
            Command::Connect if reject => Some(
                Frame::new(Command::Error)
                    .with_header("message", "Invalid token")
                    .with_body("expired"),
            ),
            Command::Connect => Some(
                Frame::new(Command::Connected)
                    .with_header("version", "1.2")
                    .with_header("heart-beat", "0,0"),
            ),
            Command::Subscribe => {
                let id = frame.header("id").unwrap_or_default();
                let destination = frame.header("destination").unwrap_or_default();
                Some(
                    Frame::new(Command::Message)
                        .with_header("destination", destination)
                        .with_header("subscription", id)
                        .with_header("message-id", "m-1")
                        .with_body(r#"{"hello":"world"}"#),
                )
            }
            _ => None,
        };
        let done = frame.command == Command::Disconnect;
        observed.frames.push(frame);
        if let Some(reply) = reply {
            send_frame(&mut ws, &reply).await;
        }
        if done || reject {
            break;
        }
    }
    let _ = ws.close(None).await;
    observed
}

async fn start(reject: bool) -> (ConnectionRegistry, oneshot::Receiver<Observed>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(broker(listener, reject).await);
    });

    let config = RegistryConfig::new()
        .base_url(format!("http://{addr}"))
        .heartbeat(Duration::ZERO, Duration::ZERO)
        .connect_timeout(Duration::from_secs(5));
    (ConnectionRegistry::new(config), rx)
}

#[tokio::test]
async fn test_session_round_trip() {
    let (registry, observed) = start(false).await;

    tokio::time::timeout(WAIT, registry.connect(TOKEN, ENDPOINT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.connection_state(ENDPOINT), ConnectionState::Connected);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = registry.subscribe(
        "/topic/notifications/alice",
        move |result| {
            let _ = tx.send(result);
        },
        Headers::new(),
        ENDPOINT,
    );

    let message = tokio::time::timeout(WAIT, rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message.destination, "/topic/notifications/alice");
    assert_eq!(message.body["hello"], "world");

    registry
        .send(
            "/app/capsule-content/connect/42",
            Headers::new(),
            &serde_json::json!({ "capsuleId": 42 }),
            ENDPOINT,
        )
        .await
        .unwrap();
    registry.disconnect(ENDPOINT);

    let observed = tokio::time::timeout(WAIT, observed).await.unwrap().unwrap();
    assert_eq!(observed.path, ENDPOINT);
    assert_eq!(observed.authorization.as_deref(), Some("Bearer a.b.c"));

    let commands: Vec<Command> = observed.frames.iter().map(|f| f.command).collect();
    assert_eq!(
        commands,
        vec![
            Command::Connect,
            Command::Subscribe,
            Command::Send,
            Command::Disconnect
        ]
    );

    let connect = &observed.frames[0];
    assert_eq!(connect.header("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.header("heart-beat"), Some("0,0"));
    assert_eq!(connect.header("Authorization"), Some("Bearer a.b.c"));

    let send = &observed.frames[2];
    assert_eq!(send.header("content-type"), Some("application/json"));
    assert_eq!(send.body, br#"{"capsuleId":42}"#.to_vec());
}

#[tokio::test]
async fn test_error_frame_rejects_handshake() {
    let (registry, observed) = start(true).await;

    let err = tokio::time::timeout(WAIT, registry.connect(TOKEN, ENDPOINT))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::HandshakeRejected {
            endpoint: ENDPOINT.to_string(),
            reason: "Invalid token: expired".to_string(),
        }
    );
    assert_eq!(registry.connection_state(ENDPOINT), ConnectionState::Error);

    registry.disconnect(ENDPOINT);
    let observed = tokio::time::timeout(WAIT, observed).await.unwrap().unwrap();
    assert_eq!(observed.frames.len(), 1);
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = ConnectionRegistry::new(
        RegistryConfig::new()
            .base_url(format!("ws://{addr}"))
            .connect_timeout(Duration::from_secs(5)),
    );
    let err = tokio::time::timeout(WAIT, registry.connect(TOKEN, ENDPOINT))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RegistryError::TransportError { .. }));
    registry.disconnect(ENDPOINT);
    assert!(registry.endpoints().is_empty());
}

fn raw_request(addr: std::net::SocketAddr, heartbeat: Duration) -> ConnectRequest {
    ConnectRequest {
        endpoint: ENDPOINT.to_string(),
        url: format!("ws://{addr}{ENDPOINT}"),
        upgrade_headers: Vec::new(),
        connect_headers: vec![
            ("accept-version".to_string(), "1.2".to_string()),
            (
                "heart-beat".to_string(),
                format!("{0},{0}", heartbeat.as_millis()),
            ),
        ],
        heartbeat_outgoing: heartbeat,
        heartbeat_incoming: heartbeat,
        max_message_size: 64 * 1024,
    }
}

#[tokio::test]
async fn test_heart_beats_sent_and_silent_server_fails_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (beat_tx, beat_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut decoder = FrameDecoder::new(64 * 1024);
        let connect = next_frame(&mut ws, &mut decoder).await.unwrap();
        assert_eq!(connect.command, Command::Connect);
        send_frame(
            &mut ws,
            &Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", "1000,1000"),
        )
        .await;

        // Read what the client sends, never answer.
        let mut beat_tx = Some(beat_tx);
        while let Some(Ok(msg)) = ws.next().await {
            if matches!(&msg, Message::Text(text) if text.as_str() == "\n") {
                if let Some(tx) = beat_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _handle = WsConnector::new().open(raw_request(addr, Duration::from_secs(1)), tx);

    let connected = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match connected {
        TransportEvent::Connected { heart_beat, .. } => {
            assert_eq!(heart_beat.outgoing, Duration::from_secs(1));
            assert_eq!(heart_beat.incoming, Duration::from_secs(1));
        }
        other => panic!("expected Connected, got {other:?}"),
    }

    tokio::time::timeout(WAIT, beat_rx).await.unwrap().unwrap();

    let failed = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    match failed {
        TransportEvent::Failed(TransportFailure::Io(reason)) => {
            assert!(reason.contains("no data from server"), "{reason}");
        }
        other => panic!("expected Failed(Io), got {other:?}"),
    }
}

#[tokio::test]
async fn test_shutdown_cancels_stalled_upgrade() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = oneshot::channel();

    // Accepts TCP but never answers the HTTP upgrade.
    tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let _ = tcp.read_to_end(&mut request).await;
        let _ = closed_tx.send(request);
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = WsConnector::new().open(raw_request(addr, Duration::ZERO), tx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown();

    // The session ends without reporting anything and drops the socket.
    let event = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
    assert!(event.is_none());
    let request = tokio::time::timeout(WAIT, closed_rx).await.unwrap().unwrap();
    assert!(request.starts_with(b"GET /ws-capsule-content"));
}
