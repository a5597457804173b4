//! Minimal STOMP 1.2 frame codec.
//!
//! Each WebSocket text message carries exactly one frame:
//!
//! ```text
//! COMMAND
//! header:value
//!
//! body^@
//! ```
//!
//! Only the commands a subscribing client needs are modelled. A message made
//! of nothing but end-of-line characters is a heart-beat and decodes to
//! `Ok(None)`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StompError {
    #[error("frame is missing its NUL terminator")]
    MissingTerminator,

    #[error("unknown STOMP command `{0}`")]
    UnknownCommand(String),

    #[error("malformed header line `{0}`")]
    MalformedHeader(String),

    #[error("invalid escape sequence `\\{0}` in header")]
    InvalidEscape(char),

    #[error("content-length does not match the frame body")]
    BadContentLength,
}

/// Frame commands understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            StompCommand::Connect => "CONNECT",
            StompCommand::Connected => "CONNECTED",
            StompCommand::Subscribe => "SUBSCRIBE",
            StompCommand::Unsubscribe => "UNSUBSCRIBE",
            StompCommand::Send => "SEND",
            StompCommand::Message => "MESSAGE",
            StompCommand::Receipt => "RECEIPT",
            StompCommand::Error => "ERROR",
            StompCommand::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" | "STOMP" => StompCommand::Connect,
            "CONNECTED" => StompCommand::Connected,
            "SUBSCRIBE" => StompCommand::Subscribe,
            "UNSUBSCRIBE" => StompCommand::Unsubscribe,
            "SEND" => StompCommand::Send,
            "MESSAGE" => StompCommand::Message,
            "RECEIPT" => StompCommand::Receipt,
            "ERROR" => StompCommand::Error,
            "DISCONNECT" => StompCommand::Disconnect,
            _ => return None,
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim for 1.0 compatibility.
    fn escapes_headers(self) -> bool {
        !matches!(self, StompCommand::Connect | StompCommand::Connected)
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heart-beat settings in milliseconds, as carried by the `heart-beat` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send heart-beats (0 = never).
    pub send_ms: u32,
    /// Desired interval between heart-beats received from the peer (0 = none).
    pub recv_ms: u32,
}

impl HeartBeat {
    pub fn new(send_ms: u32, recv_ms: u32) -> Self {
        Self { send_ms, recv_ms }
    }

    /// Parse a `cx,cy` header value. Garbage yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let (send, recv) = value.split_once(',')?;
        Some(Self {
            send_ms: send.trim().parse().ok()?,
            recv_ms: recv.trim().parse().ok()?,
        })
    }

    /// Interval at which the client must send heart-beats, given what the
    /// server answered in CONNECTED. `None` means no heart-beats.
    pub fn outgoing_interval(self, server: HeartBeat) -> Option<Duration> {
        if self.send_ms == 0 || server.recv_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(u64::from(
            self.send_ms.max(server.recv_ms),
        )))
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.recv_ms)
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header (builder style).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body (builder style).
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // ------------------------------------------------------------------
    // Client frames
    // ------------------------------------------------------------------

    /// CONNECT frame carrying the bearer token as a native header.
    pub fn connect(host: &str, auth_token: Option<&str>, heart_beat: HeartBeat) -> Self {
        let mut frame = Frame::new(StompCommand::Connect)
            .with_header("accept-version", "1.2,1.1")
            .with_header("host", host)
            .with_header("heart-beat", heart_beat.to_string());
        if let Some(token) = auth_token {
            frame = frame.with_header("Authorization", format!("Bearer {token}"));
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(StompCommand::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(StompCommand::Unsubscribe).with_header("id", id)
    }

    /// SEND frame with a JSON body.
    pub fn send(destination: &str, body: impl Into<String>) -> Self {
        let body = body.into();
        Frame::new(StompCommand::Send)
            .with_header("destination", destination)
            .with_header("content-type", "application/json")
            .with_header("content-length", body.len().to_string())
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(StompCommand::Disconnect)
    }

    // ------------------------------------------------------------------
    // Codec
    // ------------------------------------------------------------------

    /// Serialize the frame, including the trailing NUL.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. Returns `Ok(None)` for a heart-beat.
    pub fn decode(text: &str) -> Result<Option<Frame>, StompError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text).ok_or(StompError::MissingTerminator)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command_line = lines.next().unwrap_or_default();
        let command = StompCommand::parse(command_line)
            .ok_or_else(|| StompError::UnknownCommand(command_line.to_string()))?;

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if command.escapes_headers() {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        let body = match frame.header("content-length") {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| StompError::BadContentLength)?;
                let body = rest.get(..len).ok_or(StompError::BadContentLength)?;
                if !rest[len..].starts_with('\0') {
                    return Err(StompError::BadContentLength);
                }
                body
            }
            None => {
                let end = rest.find('\0').ok_or(StompError::MissingTerminator)?;
                &rest[..end]
            }
        };

        Ok(Some(Frame {
            body: body.to_string(),
            ..frame
        }))
    }
}

/// Split at the blank line ending the header block.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (at, skip) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => {
            // Header-only frame: `COMMAND\n\0` style with no blank line.
            let nul = text.find('\0')?;
            return Some((text[..nul].trim_end_matches(['\r', '\n']), &text[nul..]));
        }
    };
    Some((&text[..at], &text[at + skip..]))
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(s: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
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
            Some(other) => return Err(StompError::InvalidEscape(other)),
            None => return Err(StompError::InvalidEscape(' ')),
        }
    }
    Ok(out)
}
