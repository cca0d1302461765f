//! Wire codec: line framing plus parsing and serialization of protocol
//! messages.
//!
//! Parsing follows the classic RFC 1459 shape
//! `[:prefix ]command[ middle...][ :trailing]`, with tokens separated by
//! ASCII spaces. A line with no command (blank, or a bare prefix) is not a
//! message and parses to `None`.

use super::message::ProtocolMessage;
use bytes::BytesMut;
use std::io;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// Longest inbound line kept; anything longer is dropped up to its terminator.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Parse a single protocol line (terminator optional) into a message.
///
/// Returns `None` for blank lines and for lines that carry no command.
pub fn parse_line(raw: &str) -> Option<ProtocolMessage> {
    let line = raw.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let (prefix, rest) = match line.strip_prefix(':') {
        Some(stripped) => {
            let (prefix, rest) = stripped.split_once(' ')?;
            let prefix = (!prefix.is_empty()).then(|| prefix.to_string());
            (prefix, rest)
        }
        None => (None, line),
    };

    let (head, trailing) = match rest.split_once(" :") {
        Some((head, trailing)) => (head, Some(trailing)),
        None => (rest, None),
    };
    let mut tokens = head.split(' ').filter(|t| !t.is_empty()).map(str::to_string);
    let command = tokens.next()?;

    let mut args: Vec<String> = tokens.collect();
    args.extend(trailing.map(str::to_string));

    Some(ProtocolMessage {
        prefix,
        command,
        args,
    })
}

/// Serialize a message into a raw line, without the CRLF terminator.
///
/// The last argument gets a leading `:` when it would not survive a
/// whitespace split on its own: it contains whitespace, is empty, or
/// starts with `:`.
pub fn serialize(msg: &ProtocolMessage) -> String {
    let mut line = String::new();

    if let Some(prefix) = msg.prefix.as_deref().filter(|p| !p.is_empty()) {
        line.push(':');
        line.push_str(prefix);
        line.push(' ');
    }
    line.push_str(&msg.command);

    if let Some((last, leading)) = msg.args.split_last() {
        for arg in leading {
            line.push(' ');
            line.push_str(arg);
        }
        line.push(' ');
        if needs_colon(last) {
            line.push(':');
        }
        line.push_str(last);
    }

    line
}

fn needs_colon(arg: &str) -> bool {
    arg.is_empty() || arg.starts_with(':') || arg.contains(char::is_whitespace)
}

/// Frames inbound bytes into protocol lines for `FramedRead`.
///
/// Lines end at LF; a CR right before it is stripped. Oversized lines and
/// lines that are not UTF-8 are logged and skipped, so one bad line never
/// ends the session.
#[derive(Debug)]
pub struct LineCodec {
    lines: LinesCodec,
}

impl LineCodec {
    pub fn new() -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            match self.lines.decode(buf) {
                Ok(line) => return Ok(line),
                Err(e) => skip_line(e)?,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            match self.lines.decode_eof(buf) {
                Ok(line) => return Ok(line),
                Err(e) => skip_line(e)?,
            }
        }
    }
}

// `LinesCodec` has already consumed the offending bytes when it reports these.
fn skip_line(err: LinesCodecError) -> io::Result<()> {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            warn!(limit = MAX_LINE_BYTES, "Discarding oversized input line");
            Ok(())
        }
        LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
            warn!("Discarding input line that is not UTF-8");
            Ok(())
        }
        LinesCodecError::Io(e) => Err(e),
    }
}
