//! Duplex transport between the registry and the network.
//!
//! The registry never touches sockets directly. It asks a [`Connector`] to
//! open a session and receives [`TransportEvent`]s on a channel; outbound
//! frames go through the [`TransportHandle`] the connector returns. The
//! handle is owned exclusively by one connection record and is replaced on
//! every reconnect.
//!
//! [`WsConnector`] is the production connector: a STOMP session over a
//! `tokio-tungstenite` WebSocket.
//!
//! ```text
//! registry ──Outbound──► TransportHandle ──► session task ──► WebSocket
//! registry ◄──TransportEvent── EventSink ◄── session task ◄── WebSocket
//! ```

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tracing::{debug, instrument, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tungstenite::Message;

use crate::error::TransportFailure;
use crate::stomp::{Command, Frame, FrameDecoder, HeartBeat};

/// Everything a connector needs to open one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Logical endpoint name.
    pub endpoint: String,
    /// Resolved `ws(s)://` URL.
    pub url: String,
    /// Headers sent on the HTTP upgrade request.
    pub upgrade_headers: Vec<(String, String)>,
    /// Headers sent on the STOMP CONNECT frame.
    pub connect_headers: Vec<(String, String)>,
    /// Outgoing heart-beat interval offered to the server.
    pub heartbeat_outgoing: Duration,
    /// Incoming heart-beat interval requested from the server.
    pub heartbeat_incoming: Duration,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
}

impl ConnectRequest {
    /// Look up the first value of a CONNECT header.
    pub fn connect_header(&self, name: &str) -> Option<&str> {
        self.connect_headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Events a transport reports to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The STOMP handshake completed.
    Connected {
        /// Negotiated protocol version.
        version: Option<String>,
        /// Server identification, if sent.
        server: Option<String>,
        /// Negotiated heart-beat intervals.
        heart_beat: HeartBeat,
    },
    /// A frame arrived after the handshake.
    Frame(Frame),
    /// The session could not be established or broke.
    Failed(TransportFailure),
    /// The peer closed the socket.
    Closed {
        /// WebSocket close code, if one was sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Sender half given to a connector for reporting events.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Commands from the registry to a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Write a frame.
    Frame(Frame),
    /// Send DISCONNECT and close the socket.
    Shutdown,
}

/// Owned handle to one running session.
///
/// Dropping the handle closes the outbound channel, which also ends the
/// session, including one still waiting on the WebSocket upgrade.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    /// Create a handle and the receiver a session reads commands from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { outbound: tx }, rx)
    }

    /// Queue a frame for the session.
    pub fn send(&self, frame: Frame) -> Result<(), TransportFailure> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportFailure::Io("transport is closed".to_string()))
    }

    /// Check if the session has stopped reading commands.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Ask the session to disconnect gracefully and release the handle.
    ///
    /// The session task is left to finish its close handshake on its own.
    pub fn shutdown(self) {
        let _ = self.outbound.send(Outbound::Shutdown);
    }
}

/// Opens sessions for the registry.
///
/// Implementations must report exactly one of `Connected`, `Failed` or
/// `Closed` to finish the handshake phase, and must not report anything
/// after `Failed` or `Closed`.
pub trait Connector: Send + Sync + 'static {
    /// Start opening a session. Must not block.
    fn open(&self, request: ConnectRequest, events: EventSink) -> TransportHandle;
}

/// STOMP-over-WebSocket connector built on `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a new connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, request: ConnectRequest, events: EventSink) -> TransportHandle {
        let (handle, outbound) = TransportHandle::channel();
        tokio::spawn(run_session(request, events, outbound));
        handle
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How a session ended when it did not fail.
enum SessionEnd {
    /// The registry asked for shutdown.
    Shutdown,
    /// The peer closed the socket.
    Closed { code: Option<u16>, reason: String },
}

#[instrument(skip_all, fields(endpoint = %request.endpoint))]
async fn run_session(
    request: ConnectRequest,
    events: EventSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    match session(&request, &events, &mut outbound).await {
        Ok(SessionEnd::Shutdown) => debug!("Session shut down"),
        Ok(SessionEnd::Closed { code, reason }) => {
            debug!(?code, reason = %reason, "Session closed by peer");
            let _ = events.send(TransportEvent::Closed { code, reason });
        }
        Err(failure) => {
            warn!(error = %failure, "Session failed");
            let _ = events.send(TransportEvent::Failed(failure));
        }
    }
}

async fn session(
    request: &ConnectRequest,
    events: &EventSink,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Result<SessionEnd, TransportFailure> {
    // Frames queued before CONNECTED are written once the session is up.
    let mut queued = Vec::new();

    // A shutdown must not wait for a stalled TCP or TLS connect.
    let open = open_socket(request);
    tokio::pin!(open);
    let stream = loop {
        tokio::select! {
            opened = &mut open => break opened?,
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => queued.push(frame),
                Some(Outbound::Shutdown) | None => {
                    debug!("Shutdown before the upgrade completed");
                    return Ok(SessionEnd::Shutdown);
                }
            },
        }
    };
    let (mut sink, mut stream) = stream.split();
    let mut decoder = FrameDecoder::new(request.max_message_size);

    let connect = Frame::new(Command::Connect).with_headers(request.connect_headers.clone());
    send_frame(&mut sink, &connect).await?;
    let connected = loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => queued.push(frame),
                Some(Outbound::Shutdown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            msg = stream.next() => {
                let frames = match msg {
                    Some(Ok(msg)) => match read_message(&mut sink, &mut decoder, msg).await? {
                        Read::Frames(frames) => frames,
                        Read::Closed { code, reason } => {
                            return Err(TransportFailure::Io(format!(
                                "closed during handshake ({}): {reason}",
                                code.map_or_else(|| "no code".to_string(), |c| c.to_string())
                            )));
                        }
                    },
                    Some(Err(e)) => return Err(TransportFailure::Io(e.to_string())),
                    None => return Err(TransportFailure::Io("stream ended during handshake".to_string())),
                };
                if let Some(frame) = handshake_reply(frames)? {
                    break frame;
                }
            }
        }
    };

    let heart_beat = HeartBeat::negotiate(
        request.heartbeat_outgoing,
        request.heartbeat_incoming,
        connected.header("heart-beat"),
    );
    debug!(?heart_beat, version = ?connected.header("version"), "Handshake complete");
    let _ = events.send(TransportEvent::Connected {
        version: connected.header("version").map(str::to_string),
        server: connected.header("server").map(str::to_string),
        heart_beat,
    });

    for frame in queued {
        send_frame(&mut sink, &frame).await?;
    }

    let mut send_ticker = ticker(heart_beat.outgoing);
    let mut watchdog = ticker(heart_beat.incoming);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            cmd = outbound.recv() => match cmd {
                Some(Outbound::Frame(frame)) => send_frame(&mut sink, &frame).await?,
                Some(Outbound::Shutdown) | None => {
                    let disconnect = Frame::new(Command::Disconnect);
                    let _ = send_frame(&mut sink, &disconnect).await;
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            msg = stream.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(msg)) => match read_message(&mut sink, &mut decoder, msg).await? {
                        Read::Frames(frames) => {
                            for frame in frames {
                                let _ = events.send(TransportEvent::Frame(frame));
                            }
                        }
                        Read::Closed { code, reason } => {
                            return Ok(SessionEnd::Closed { code, reason });
                        }
                    },
                    Some(Err(e)) => return Err(TransportFailure::Io(e.to_string())),
                    None => {
                        return Ok(SessionEnd::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                    }
                }
            }
            () = tick(&mut send_ticker) => {
                sink.send(Message::Text("\n".into()))
                    .await
                    .map_err(|e| TransportFailure::Io(e.to_string()))?;
            }
            () = tick(&mut watchdog) => {
                if last_seen.elapsed() > heart_beat.incoming * 2 {
                    return Err(TransportFailure::Io(format!(
                        "no data from server for {} ms",
                        last_seen.elapsed().as_millis()
                    )));
                }
            }
        }
    }
}

async fn open_socket(request: &ConnectRequest) -> Result<WsStream, TransportFailure> {
    let mut upgrade = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportFailure::Io(format!("invalid WebSocket URL {}: {e}", request.url)))?;

    for (name, value) in &request.upgrade_headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportFailure::Io(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportFailure::Io(format!("invalid header value for {name}: {e}")))?;
        upgrade.headers_mut().insert(name, value);
    }

    let (stream, _response) = connect_async(upgrade).await.map_err(classify_upgrade_error)?;
    Ok(stream)
}

fn classify_upgrade_error(err: tungstenite::Error) -> TransportFailure {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return TransportFailure::Rejected(format!("upgrade refused with HTTP {status}"));
        }
    }
    TransportFailure::Io(err.to_string())
}

// Picks CONNECTED out of the first frames; ERROR means the server said no.
fn handshake_reply(frames: Vec<Frame>) -> Result<Option<Frame>, TransportFailure> {
    for frame in frames {
        match frame.command {
            Command::Connected => return Ok(Some(frame)),
            Command::Error => return Err(TransportFailure::Rejected(error_reason(&frame))),
            other => debug!(command = %other, "Ignoring frame before CONNECTED"),
        }
    }
    Ok(None)
}

/// Human-readable reason carried by an ERROR frame.
pub fn error_reason(frame: &Frame) -> String {
    match (frame.header("message"), frame.body_text()) {
        (Some(message), Ok(body)) if !body.trim().is_empty() => format!("{message}: {}", body.trim()),
        (Some(message), _) => message.to_string(),
        (None, Ok(body)) if !body.trim().is_empty() => body.trim().to_string(),
        _ => "server sent ERROR".to_string(),
    }
}

enum Read {
    Frames(Vec<Frame>),
    Closed { code: Option<u16>, reason: String },
}

async fn read_message(
    sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
    decoder: &mut FrameDecoder,
    msg: Message,
) -> Result<Read, TransportFailure> {
    let decode = |decoder: &mut FrameDecoder, data: &[u8]| {
        decoder
            .decode(data)
            .map_err(|e| TransportFailure::Io(format!("protocol error: {e}")))
    };

    match msg {
        Message::Text(text) => Ok(Read::Frames(decode(decoder, text.as_bytes())?)),
        Message::Binary(data) => Ok(Read::Frames(decode(decoder, &data)?)),
        Message::Ping(data) => {
            sink.send(Message::Pong(data))
                .await
                .map_err(|e| TransportFailure::Io(e.to_string()))?;
            Ok(Read::Frames(Vec::new()))
        }
        Message::Pong(_) | Message::Frame(_) => Ok(Read::Frames(Vec::new())),
        Message::Close(frame) => {
            let (code, reason) = frame
                .map(|cf| (Some(u16::from(cf.code)), cf.reason.to_string()))
                .unwrap_or((None, String::new()));
            Ok(Read::Closed { code, reason })
        }
    }
}

async fn send_frame(
    sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
    frame: &Frame,
) -> Result<(), TransportFailure> {
    let msg = match frame.encode_text() {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame.encode().into()),
    };
    sink.send(msg)
        .await
        .map_err(|e| TransportFailure::Io(e.to_string()))
}

fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_send_after_receiver_dropped() {
        let (handle, rx) = TransportHandle::channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Frame::unsubscribe("sub-0")),
            Err(TransportFailure::Io(_))
        ));
    }

    #[test]
    fn test_handle_shutdown_sends_command() {
        let (handle, mut rx) = TransportHandle::channel();
        handle.send(Frame::unsubscribe("sub-1")).unwrap();
        handle.shutdown();
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Frame(Frame::unsubscribe("sub-1"))
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Shutdown);
    }

    #[test]
    fn test_handshake_reply_connected() {
        let frames = vec![
            Frame::new(Command::Receipt),
            Frame::new(Command::Connected).with_header("version", "1.2"),
        ];
        let reply = handshake_reply(frames).unwrap().unwrap();
        assert_eq!(reply.header("version"), Some("1.2"));
    }

    #[test]
    fn test_handshake_reply_error_is_rejection() {
        let frames = vec![Frame::new(Command::Error)
            .with_header("message", "Invalid token")
            .with_body("expired")];
        let err = handshake_reply(frames).unwrap_err();
        assert_eq!(err, TransportFailure::Rejected("Invalid token: expired".to_string()));
    }

    #[test]
    fn test_handshake_reply_waits() {
        assert_eq!(handshake_reply(Vec::new()).unwrap(), None);
    }

    #[test]
    fn test_error_reason_fallbacks() {
        assert_eq!(error_reason(&Frame::new(Command::Error)), "server sent ERROR");
        assert_eq!(
            error_reason(&Frame::new(Command::Error).with_body("boom\n")),
            "boom"
        );
    }

    #[test]
    fn test_connect_header_lookup() {
        let request = ConnectRequest {
            endpoint: "/ws-x".to_string(),
            url: "ws://localhost/ws-x".to_string(),
            upgrade_headers: Vec::new(),
            connect_headers: vec![("accept-version".to_string(), "1.2".to_string())],
            heartbeat_outgoing: Duration::ZERO,
            heartbeat_incoming: Duration::ZERO,
            max_message_size: 1024,
        };
        assert_eq!(request.connect_header("Accept-Version"), Some("1.2"));
        assert_eq!(request.connect_header("host"), None);
    }

    #[tokio::test]
    async fn test_ws_connector_reports_failure_for_bad_url() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = ConnectRequest {
            endpoint: "/ws-x".to_string(),
            url: "not a url".to_string(),
            upgrade_headers: Vec::new(),
            connect_headers: Vec::new(),
            heartbeat_outgoing: Duration::ZERO,
            heartbeat_incoming: Duration::ZERO,
            max_message_size: 1024,
        };
        let _handle = WsConnector::new().open(request, tx);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TransportEvent::Failed(TransportFailure::Io(_))));
    }

    #[test]
    fn test_ticker_disabled_for_zero() {
        assert!(ticker(Duration::ZERO).is_none());
    }
}
