//! STOMP frame codec.
//!
//! Every endpoint speaks STOMP 1.2 (falling back to 1.1/1.0) over its
//! WebSocket. A single WebSocket message may carry zero frames (a heart-beat
//! EOL), one frame, several frames, or a fragment of one, so decoding goes
//! through the incremental [`FrameDecoder`].
//!
//! # Wire format
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body\0
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::error::StompError;

/// A STOMP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Client handshake (1.2 alias).
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Publish to a destination.
    Send,
    /// Subscribe to a destination.
    Subscribe,
    /// Cancel a subscription.
    Unsubscribe,
    /// Acknowledge a message.
    Ack,
    /// Negative acknowledgement.
    Nack,
    /// Begin a transaction.
    Begin,
    /// Commit a transaction.
    Commit,
    /// Abort a transaction.
    Abort,
    /// Graceful session end.
    Disconnect,
    /// Server-delivered message.
    Message,
    /// Server receipt.
    Receipt,
    /// Server error.
    Error,
}

impl Command {
    /// The wire spelling of this command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line.
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        };
        Some(command)
    }

    // CONNECT and CONNECTED frames carry raw header values
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
///
/// Headers keep their wire order. When a header name repeats, the first
/// occurrence is the one [`Frame::header`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame command.
    pub command: Command,
    /// Ordered header list.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes.
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append every header from an iterator.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up the first value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The body as UTF-8 text.
    pub fn body_text(&self) -> Result<&str, StompError> {
        std::str::from_utf8(&self.body).map_err(|_| StompError::InvalidUtf8)
    }

    /// Build a SUBSCRIBE frame.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
    }

    /// Build an UNSUBSCRIBE frame.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// Build a SEND frame.
    pub fn send(destination: &str, body: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_body(body)
    }

    /// Serialize to wire bytes, including the trailing NUL.
    ///
    /// A `content-length` header is added when the body is non-empty and
    /// the caller did not supply one.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');

        let escape = self.command.escapes_headers();
        let mut has_length = false;
        for (name, value) in &self.headers {
            has_length |= name == "content-length";
            push_header_part(&mut out, name, escape);
            out.push(b':');
            push_header_part(&mut out, value, escape);
            out.push(b'\n');
        }
        if !self.body.is_empty() && !has_length {
            out.extend_from_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }

        out.push(b'\n');
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }

    /// Serialize to a string for a WebSocket text message.
    pub fn encode_text(&self) -> Result<String, StompError> {
        String::from_utf8(self.encode()).map_err(|_| StompError::InvalidUtf8)
    }
}

fn push_header_part(out: &mut Vec<u8>, part: &str, escape: bool) {
    if !escape {
        out.extend_from_slice(part.as_bytes());
        return;
    }
    for byte in part.bytes() {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b':' => out.extend_from_slice(b"\\c"),
            other => out.push(other),
        }
    }
}

fn unescape_header_part(part: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape(part.to_string())),
        }
    }
    Ok(out)
}

/// Incremental frame decoder.
///
/// Feed raw WebSocket payloads with [`push`](Self::push) and drain frames
/// with [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames larger than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Push `data` and decode every complete frame now available.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Frame>, StompError> {
        self.push(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StompError> {
        self.skip_heartbeats();
        if self.buf.is_empty() {
            return Ok(None);
        }

        let Some((command, headers, body_start)) = self.parse_head()? else {
            return self.incomplete();
        };

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::InvalidContentLength(v.clone()))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = body_start
                    .checked_add(len)
                    .filter(|end| *end < self.max_frame_size)
                    .ok_or(StompError::FrameTooLarge {
                        size: body_start.saturating_add(len).saturating_add(1),
                        limit: self.max_frame_size,
                    })?;
                if self.buf.len() <= end {
                    return self.incomplete();
                }
                if self.buf[end] != 0 {
                    return Err(StompError::UnterminatedBody);
                }
                end
            }
            None => match self.buf[body_start..].iter().position(|&b| b == 0) {
                Some(offset) => body_start + offset,
                None => return self.incomplete(),
            },
        };
        if body_end >= self.max_frame_size {
            return Err(StompError::FrameTooLarge {
                size: body_end + 1,
                limit: self.max_frame_size,
            });
        }

        let body = self.buf[body_start..body_end].to_vec();
        self.buf.advance(body_end + 1);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }

    fn incomplete(&self) -> Result<Option<Frame>, StompError> {
        if self.buf.len() > self.max_frame_size {
            return Err(StompError::FrameTooLarge {
                size: self.buf.len(),
                limit: self.max_frame_size,
            });
        }
        Ok(None)
    }

    fn skip_heartbeats(&mut self) {
        loop {
            if self.buf.first() == Some(&b'\n') {
                self.buf.advance(1);
            } else if self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
            } else {
                break;
            }
        }
    }

    // Returns None until the blank line ending the header block is buffered.
    fn parse_head(&self) -> Result<Option<(Command, Vec<(String, String)>, usize)>, StompError> {
        let mut pos = 0;
        let mut command = None;
        let mut headers = Vec::new();

        loop {
            let Some(offset) = self.buf[pos..].iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let raw = &self.buf[pos..pos + offset];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = std::str::from_utf8(raw).map_err(|_| StompError::InvalidUtf8)?;
            pos += offset + 1;

            let Some(cmd) = command else {
                command = Some(
                    Command::parse(line)
                        .ok_or_else(|| StompError::UnknownCommand(line.to_string()))?,
                );
                continue;
            };

            if line.is_empty() {
                return Ok(Some((cmd, headers, pos)));
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if cmd.escapes_headers() {
                headers.push((unescape_header_part(name)?, unescape_header_part(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }
    }
}

/// Effective heart-beat intervals after negotiation.
///
/// A zero duration means heart-beating is disabled in that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// How often the client must send something.
    pub outgoing: Duration,
    /// How often the server promises to send something.
    pub incoming: Duration,
}

impl HeartBeat {
    /// Negotiate from the client's offer and the server's `heart-beat` header.
    pub fn negotiate(client_outgoing: Duration, client_incoming: Duration, server: Option<&str>) -> Self {
        let (sx, sy) = server.and_then(parse_heart_beat).unwrap_or((0, 0));
        let cx = u64::try_from(client_outgoing.as_millis()).unwrap_or(u64::MAX);
        let cy = u64::try_from(client_incoming.as_millis()).unwrap_or(u64::MAX);

        let outgoing = if cx == 0 || sy == 0 { 0 } else { cx.max(sy) };
        let incoming = if cy == 0 || sx == 0 { 0 } else { cy.max(sx) };

        Self {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        }
    }
}

/// Parse a `heart-beat` header value (`x,y` in milliseconds).
pub fn parse_heart_beat(value: &str) -> Option<(u64, u64)> {
    let (x, y) = value.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}
