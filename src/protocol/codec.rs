//! Wire format for message framing.
//!
//! One message per line: a compact JSON object followed by `\n`.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::message::Message;
use crate::error::{ProtocolErrorKind, TransportError, TransportResult};

/// Frame terminator.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Maximum frame size (1 MB by default, can be overridden).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Deepest payload value a frame can carry. serde_json refuses to parse
/// more than 127 nested arrays/objects, and the envelope and its `data`
/// object use two of those levels.
pub const MAX_VALUE_DEPTH: usize = 125;

/// Encode a message as one newline-terminated frame.
pub fn encode(message: &Message) -> TransportResult<Vec<u8>> {
    let mut frame = encode_line(message)?.into_bytes();
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Decode one frame. The trailing newline (or `\r\n`) is optional.
pub fn decode(frame: &[u8]) -> TransportResult<Message> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| TransportError::decode(format!("invalid UTF-8: {}", e)))?;
    let line = text.strip_suffix('\n').unwrap_or(text);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.contains('\n') {
        return Err(TransportError::decode("frame contains more than one line"));
    }
    decode_line(line)
}

fn encode_line(message: &Message) -> TransportResult<String> {
    if message.message_type.is_empty() {
        return Err(invalid_frame("message type is empty"));
    }
    if message.data.values().any(|v| v.contains_non_finite()) {
        return Err(invalid_frame("payload contains a NaN or infinite number"));
    }
    if message.data.values().any(|v| v.depth() > MAX_VALUE_DEPTH) {
        return Err(invalid_frame("payload is nested too deeply"));
    }

    let line = serde_json::to_string(message)?;

    // serde_json escapes control characters; a raw newline here would split the frame.
    if line.bytes().any(|b| b == b'\n' || b == b'\r') {
        return Err(invalid_frame("serialized message contains a raw line break"));
    }
    Ok(line)
}

fn decode_line(line: &str) -> TransportResult<Message> {
    let message: Message =
        serde_json::from_str(line).map_err(|e| TransportError::decode(e.to_string()))?;
    if message.message_type.is_empty() {
        return Err(TransportError::decode("message type is empty"));
    }
    Ok(message)
}

fn invalid_frame(message: &str) -> TransportError {
    TransportError::Protocol {
        kind: ProtocolErrorKind::InvalidFrame {
            message: message.to_string(),
        },
    }
}

/// Stream codec turning a byte stream into messages and back.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_size),
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.lines.max_length()
    }

    fn map_lines_error(&self, err: LinesCodecError) -> TransportError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::Protocol {
                kind: ProtocolErrorKind::FrameTooLarge {
                    max: self.max_frame_size(),
                },
            },
            LinesCodecError::Io(e) => TransportError::Io(e),
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, TransportError> {
        match self.lines.decode(src) {
            Ok(Some(line)) => decode_line(&line).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_lines_error(e)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Message>, TransportError> {
        match self.lines.decode_eof(src) {
            Ok(Some(line)) => decode_line(&line).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(self.map_lines_error(e)),
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), TransportError> {
        let line = encode_line(&item)?;
        if line.len() > self.max_frame_size() {
            return Err(TransportError::Protocol {
                kind: ProtocolErrorKind::FrameTooLarge {
                    max: self.max_frame_size(),
                },
            });
        }
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}
