//! Minimal STOMP 1.2 frame codec.
//!
//! Frames travel as WebSocket text messages:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header names and values are escaped (`\\`, `\n`, `\r`, `\c`) except on
//! CONNECT/CONNECTED frames, as the protocol requires. A frame consisting
//! only of end-of-line characters is a heart-beat.

use std::fmt;
use std::str::FromStr;

use crate::error::RealtimeError;

/// STOMP frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Server handshake acknowledgement.
    Connected,
    /// Start receiving from a destination.
    Subscribe,
    /// Stop receiving from a destination.
    Unsubscribe,
    /// Publish to a destination.
    Send,
    /// Server delivery on a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server error report.
    Error,
    /// Graceful client shutdown.
    Disconnect,
}

impl Command {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => {
                return Err(RealtimeError::MalformedFrame(format!(
                    "unknown command {other:?}"
                )));
            }
        })
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order; the first occurrence of a name wins.
    pub headers: Vec<(String, String)>,
    /// Frame body (JSON for this protocol).
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Looks up a header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the frame, including the trailing NUL.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame. Returns `Ok(None)` for a heart-beat.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::MalformedFrame`] if the command is unknown,
    /// a header line has no colon, a header escape is invalid, or the
    /// header block is unterminated.
    pub fn parse(raw: &str) -> Result<Option<Self>, RealtimeError> {
        let trimmed = raw.trim_start_matches(['\r', '\n']);
        if trimmed.is_empty() || trimmed == "\0" {
            return Ok(None);
        }
        let (head, rest) = split_head(trimmed)?;

        let mut lines = head.lines();
        let command: Command = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .unwrap_or_default()
            .parse()?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let Some((name, value)) = line.split_once(':') else {
                return Err(RealtimeError::MalformedFrame(format!(
                    "header without colon: {line:?}"
                )));
            };
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let body = match rest.find('\0') {
            Some(end) => rest.get(..end).unwrap_or_default(),
            None => rest,
        };

        Ok(Some(Self {
            command,
            headers,
            body: body.to_string(),
        }))
    }
}

/// Splits at the blank line between headers and body.
fn split_head(raw: &str) -> Result<(&str, &str), RealtimeError> {
    if let Some(idx) = raw.find("\r\n\r\n") {
        return Ok((
            raw.get(..idx).unwrap_or_default(),
            raw.get(idx + 4..).unwrap_or_default(),
        ));
    }
    if let Some(idx) = raw.find("\n\n") {
        return Ok((
            raw.get(..idx).unwrap_or_default(),
            raw.get(idx + 2..).unwrap_or_default(),
        ));
    }
    // A frame with no headers and no body may end right after the command.
    if let Some(head) = raw.strip_suffix("\n\0").or_else(|| raw.strip_suffix('\0')) {
        return Ok((head, ""));
    }
    Err(RealtimeError::MalformedFrame(
        "unterminated header block".to_string(),
    ))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, RealtimeError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(RealtimeError::MalformedFrame(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
