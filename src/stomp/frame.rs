//! STOMP frame codec for the subset this relay speaks.
//!
//! Wire layout:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! Header values are split on the first colon only, so
//! `destination:/topic/encounter/abc:123` keeps `/topic/encounter/abc:123`.
//! Values are not escaped in either direction.

use std::fmt;
use std::str::FromStr;

use crate::{RelayError, Result};

/// Protocol version advertised in CONNECT.
pub const ACCEPT_VERSION: &str = "1.2";

/// Content type attached to every SEND.
pub const JSON_CONTENT_TYPE: &str = "application/json";

const NUL: char = '\0';

/// Frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Send,
    Message,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "SEND" => Ok(Command::Send),
            "MESSAGE" => Ok(Command::Message),
            "ERROR" => Ok(Command::Error),
            other => Err(RelayError::parse("STOMP command", format!("unknown command {other:?}"))),
        }
    }
}

/// Heart-beat proposal in milliseconds, `outgoing,incoming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u32,
    pub incoming_ms: u32,
}

impl Default for HeartBeat {
    fn default() -> Self {
        Self { outgoing_ms: 10_000, incoming_ms: 10_000 }
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing_ms, self.incoming_ms)
    }
}

/// One STOMP protocol unit.
///
/// Headers keep insertion order and unique keys. Frames are built with the
/// consuming [`Frame::header`] / [`Frame::body`] methods and not mutated after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    headers: Vec<(String, String)>,
    body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    /// CONNECT advertising STOMP 1.2 and the given heart-beat.
    pub fn connect(heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("heart-beat", heart_beat.to_string())
    }

    pub fn subscribe(id: impl Into<String>, destination: impl Into<String>) -> Self {
        Frame::new(Command::Subscribe).header("id", id).header("destination", destination)
    }

    /// SEND with a JSON body.
    pub fn send(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", JSON_CONTENT_TYPE)
            .body(body)
    }

    /// Set a header, replacing the value in place if the key is present.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((key, value)),
        }
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body_text(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// Serialize to the wire text, NUL-terminated.
    pub fn encode(&self) -> String {
        let header_len: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 2).sum();
        let mut out = String::with_capacity(self.command.as_str().len() + header_len + self.body.len() + 3);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            out.push_str(key);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }

    /// Parse one frame from wire text.
    ///
    /// Leading EOLs (heart-beats) are skipped and the trailing NUL removed.
    /// CRLF line endings are accepted.
    pub fn decode(raw: &str) -> Result<Frame> {
        let text = raw.trim_start_matches(['\r', '\n']);
        let text = match text.rfind(NUL) {
            Some(end) if text[end + 1..].trim_matches(['\r', '\n']).is_empty() => &text[..end],
            _ => text,
        };

        let (head, body) = split_head(text);
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command_line = lines.next().unwrap_or_default();
        if command_line.is_empty() {
            return Err(RelayError::parse("STOMP frame", "missing command line"));
        }
        let command = command_line.parse::<Command>()?;

        let mut headers: Vec<(String, String)> = Vec::new();
        for line in lines {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                RelayError::parse("STOMP header", format!("no separator in {line:?}"))
            })?;
            // first occurrence wins
            if !headers.iter().any(|(k, _)| k == key) {
                headers.push((key.to_string(), value.to_string()));
            }
        }

        Ok(Frame { command, headers, body: body.to_string() })
    }
}

/// Split at the first blank line. Without one the whole text is the head.
fn split_head(text: &str) -> (&str, &str) {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let split = match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((index, sep)) => (&text[..index], &text[index + sep..]),
        None => (text.trim_end_matches(['\r', '\n']), ""),
    }
}
