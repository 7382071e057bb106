//! STOMP 1.2 framing over WebSocket text messages
//!
//! The broker speaks STOMP: every WebSocket text message carries zero or more
//! NUL-terminated frames, and a bare EOL is a heart-beat.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{SdkError, SdkResult};

/// Versions offered in the CONNECT frame
pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";

/// Heart-beat sent on an idle connection
pub const HEARTBEAT_EOL: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are sent without escaping
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(SdkError::Protocol(format!("unknown command {:?}", other))),
        })
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers keep the first occurrence
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // ===== Client frames =====

    /// CONNECT frame advertising `heart_beat` as (outgoing, incoming) milliseconds
    pub fn connect(host: &str, login: Option<&str>, heart_beat: (u64, u64)) -> Self {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", ACCEPT_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heart_beat.0, heart_beat.1));
        if let Some(login) = login {
            frame = frame.header("login", login);
        }
        frame
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send_json(destination: &str, body: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Serialize to wire text, adding `content-length` when a body is present
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
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
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decode every frame in one WebSocket text message. Heart-beat EOLs are skipped.
///
/// Fails on the first bad frame; see [`decode_each`] to keep the good ones.
pub fn decode_all(input: &str) -> SdkResult<Vec<Frame>> {
    decode_each(input).into_iter().collect()
}

/// Decode frame by frame, reporting bad frames in place
///
/// After a bad frame decoding resumes past its NUL terminator. Input with no
/// further terminator ends the list.
pub fn decode_each(input: &str) -> Vec<SdkResult<Frame>> {
    let mut decoded = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(['\n', '\r']);
        if rest.is_empty() {
            return decoded;
        }
        match decode_one(rest) {
            Ok((frame, remaining)) => {
                decoded.push(Ok(frame));
                rest = remaining;
            }
            Err(e) => {
                decoded.push(Err(e));
                match rest.find('\0') {
                    Some(end) => rest = &rest[end + 1..],
                    None => return decoded,
                }
            }
        }
    }
}

fn decode_one(input: &str) -> SdkResult<(Frame, &str)> {
    let (command_line, mut rest) = split_line(input)
        .ok_or_else(|| SdkError::Protocol("frame has no command line".to_string()))?;
    let command: Command = command_line.parse()?;
    let escaped = command.escapes_headers();

    let mut frame = Frame::new(command);
    loop {
        let (line, remaining) = split_line(rest)
            .ok_or_else(|| SdkError::Protocol("frame ended inside headers".to_string()))?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SdkError::Protocol(format!("malformed header {:?}", line)))?;
        if escaped {
            frame.headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let body_len = match frame.get("content-length") {
        Some(len) => len
            .trim()
            .parse::<usize>()
            .map_err(|_| SdkError::Protocol(format!("invalid content-length {:?}", len)))?,
        None => rest
            .find('\0')
            .ok_or_else(|| SdkError::Protocol("unterminated frame".to_string()))?,
    };

    let body = rest
        .get(..body_len)
        .ok_or_else(|| SdkError::Protocol("body shorter than content-length".to_string()))?;
    let after = &rest[body_len..];
    let after = after
        .strip_prefix('\0')
        .ok_or_else(|| SdkError::Protocol("missing NUL after body".to_string()))?;

    frame.body = body.to_string();
    Ok((frame, after))
}

/// Split off one line, accepting either LF or CRLF
fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = input[..idx].strip_suffix('\r').unwrap_or(&input[..idx]);
    Some((line, &input[idx + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> SdkResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            other => {
                return Err(SdkError::Protocol(format!(
                    "undefined header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Negotiated heart-beat periods as (send every, expect every)
///
/// `client` is what CONNECT advertised; `server_header` is the CONNECTED
/// `heart-beat` value. `None` means that direction is disabled.
pub fn negotiate_heartbeat(
    client: (u64, u64),
    server_header: Option<&str>,
) -> (Option<Duration>, Option<Duration>) {
    let (sx, sy) = server_header
        .and_then(|value| value.split_once(','))
        .and_then(|(x, y)| Some((x.trim().parse::<u64>().ok()?, y.trim().parse::<u64>().ok()?)))
        .unwrap_or((0, 0));
    let (cx, cy) = client;

    let outgoing = (cx != 0 && sy != 0).then(|| Duration::from_millis(cx.max(sy)));
    let incoming = (sx != 0 && cy != 0).then(|| Duration::from_millis(sx.max(cy)));
    (outgoing, incoming)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_subscribe() {
        let text = Frame::subscribe("sub-0", "/topic/user/alice").encode();
        assert_eq!(
            text,
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/user/alice\nack:auto\n\n\0"
        );
    }

    #[test]
    fn test_encode_send_adds_content_length() {
        let body = r#"{"identity":"bob"}"#.to_string();
        let text = Frame::send_json("/app/queue/leave", body.clone()).encode();
        assert!(text.starts_with("SEND\ndestination:/app/queue/leave\n"));
        assert!(text.contains(&format!("content-length:{}\n", body.len())));
        assert!(text.ends_with(&format!("\n\n{}\0", body)));
    }

    #[test]
    fn test_connect_headers_are_not_escaped() {
        let text = Frame::connect("localhost:8080", None, (10000, 10000)).encode();
        assert!(text.starts_with("CONNECT\naccept-version:1.2,1.1,1.0\nhost:localhost:8080\n"));
        assert!(text.contains("heart-beat:10000,10000\n"));
    }

    #[test]
    fn test_decode_message_frame() {
        let wire = "MESSAGE\ndestination:/topic/match/m1\nsubscription:sub-1\nmessage-id:7\n\n{\"matchId\":\"m1\"}\0";
        let frames = decode_all(wire).unwrap();
        assert_eq!(frames.len(), 1);

        let frame = &frames[0];
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-1"));
        assert_eq!(frame.get("destination"), Some("/topic/match/m1"));
        assert_eq!(frame.body, "{\"matchId\":\"m1\"}");
    }

    #[test]
    fn test_decode_multiple_frames_and_heartbeats() {
        let wire = "\n\r\nRECEIPT\nreceipt-id:r-1\n\n\0\nCONNECTED\nversion:1.2\n\n\0\n";
        let frames = decode_all(wire).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command, Command::Receipt);
        assert_eq!(frames[1].command, Command::Connected);
        assert_eq!(frames[1].get("version"), Some("1.2"));
    }

    #[test]
    fn test_decode_heartbeat_only() {
        assert!(decode_all("\n").unwrap().is_empty());
        assert!(decode_all("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_crlf_lines() {
        let wire = "MESSAGE\r\nsubscription:sub-0\r\n\r\nhi\0";
        let frames = decode_all(wire).unwrap();
        assert_eq!(frames[0].get("subscription"), Some("sub-0"));
        assert_eq!(frames[0].body, "hi");
    }

    #[test]
    fn test_content_length_allows_nul_in_body() {
        let wire = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frames = decode_all(wire).unwrap();
        assert_eq!(frames[0].body, "a\0b");
    }

    #[test]
    fn test_header_escaping() {
        let frame = Frame::new(Command::Message).header("note", "a:b\\c\nd");
        let wire = frame.encode();
        assert!(wire.contains("note:a\\cb\\\\c\\nd\n"));

        let decoded = decode_all(&wire).unwrap();
        assert_eq!(decoded[0].get("note"), Some("a:b\\c\nd"));
    }

    #[test]
    fn test_repeated_header_keeps_first() {
        let wire = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frames = decode_all(wire).unwrap();
        assert_eq!(frames[0].get("foo"), Some("first"));
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_all("BOGUS\n\n\0").is_err());
        assert!(decode_all("MESSAGE\nsubscription:sub-0\n\nno terminator").is_err());
        assert!(decode_all("MESSAGE\nbroken-header\n\n\0").is_err());
        assert!(decode_all("MESSAGE\nx:bad\\t\n\n\0").is_err());
        assert!(decode_all("MESSAGE\ncontent-length:10\n\nab\0").is_err());
    }

    #[test]
    fn test_decode_each_keeps_frames_around_a_bad_one() {
        let wire = "MESSAGE\ndestination:/a\n\nfirst\0BOGUS\n\n\0\nMESSAGE\ndestination:/b\n\nsecond\0";
        let decoded = decode_each(wire);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().body, "first");
        assert!(matches!(decoded[1], Err(SdkError::Protocol(_))));
        assert_eq!(decoded[2].as_ref().unwrap().body, "second");

        assert!(decode_all(wire).is_err());
    }

    #[test]
    fn test_decode_each_stops_at_unterminated_tail() {
        let decoded = decode_each("MESSAGE\n\nok\0SEND\ndestination:/x\n\nno end");
        assert_eq!(decoded.len(), 2);
        assert!(decoded[0].is_ok());
        assert!(decoded[1].is_err());
    }

    #[test]
    fn test_negotiate_heartbeat() {
        let (out, inc) = negotiate_heartbeat((10000, 10000), Some("0,0"));
        assert_eq!((out, inc), (None, None));

        let (out, inc) = negotiate_heartbeat((10000, 10000), Some("5000,20000"));
        assert_eq!(out, Some(Duration::from_millis(20000)));
        assert_eq!(inc, Some(Duration::from_millis(10000)));

        let (out, inc) = negotiate_heartbeat((0, 4000), Some("8000,8000"));
        assert_eq!(out, None);
        assert_eq!(inc, Some(Duration::from_millis(8000)));

        assert_eq!(negotiate_heartbeat((1000, 1000), None), (None, None));
    }
}
