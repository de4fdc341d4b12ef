//! Content-Length framing for DAP messages.
//!
//! Every message on the wire is a header block terminated by an empty line,
//! followed by a JSON body of exactly `Content-Length` bytes:
//!
//! ```text
//! Content-Length: 63\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"debugInfo","arguments":{}}
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::message::{Message, OutgoingMessage};

/// Frames above this size are rejected unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

#[derive(Debug, Clone)]
pub struct DapCodec {
    max_message_size: usize,
    /// Body length of the frame currently being read, once its header has
    /// been consumed.
    pending_body: Option<usize>,
}

impl DapCodec {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            pending_body: None,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn decode_header(&mut self, src: &mut BytesMut) -> Result<Option<usize>, CodecError> {
        let Some(end) = src.windows(SEPARATOR.len()).position(|w| w == SEPARATOR) else {
            return Ok(None);
        };

        let length = content_length(&src[..end])?;
        if length > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size: length,
                max: self.max_message_size,
            });
        }

        src.advance(end + SEPARATOR.len());
        Ok(Some(length))
    }
}

impl Default for DapCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DapCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.pending_body {
            Some(length) => length,
            None => match self.decode_header(src)? {
                Some(length) => {
                    self.pending_body = Some(length);
                    length
                }
                None => return Ok(None),
            },
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        self.pending_body = None;
        let body = src.split_to(length);
        let message = serde_json::from_slice(&body).map_err(CodecError::Decode)?;
        Ok(Some(message))
    }
}

impl Encoder<OutgoingMessage> for DapCodec {
    type Error = CodecError;

    fn encode(&mut self, item: OutgoingMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item).map_err(CodecError::Encode)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Extract the body length from a header block. Other headers are ignored.
fn content_length(header: &[u8]) -> Result<usize, CodecError> {
    let header = std::str::from_utf8(header).map_err(|_| CodecError::InvalidUtf8)?;

    header
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case(CONTENT_LENGTH))
        .map(|(_, value)| {
            let value = value.trim();
            value
                .parse()
                .map_err(|_| CodecError::MalformedContentLength(value.to_string()))
        })
        .unwrap_or(Err(CodecError::MissingContentLength))
}
