//! Codec for decoding the agent event stream
//!
//! The feed is line oriented: each record is a run of `field: value` lines
//! (`event`, `data`, `id`) terminated by a blank line. Lines starting with `:`
//! are comments.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::Decoder;

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    #[error("Event record is not valid UTF-8")]
    InvalidUtf8,
}

impl CodecError {
    /// Whether the stream can keep going after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedPayload(_) | Self::InvalidUtf8)
    }
}

/// One undecoded record of the event stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFrame {
    /// Value of the `event:` line
    pub category: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// Value of the `id:` line
    pub id: Option<String>,
    /// Some line of the record was not UTF-8 and was left out
    pub invalid_utf8: bool,
}

#[derive(Debug, Default)]
struct PendingFrame {
    category: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    invalid_utf8: bool,
    bytes: usize,
}

impl PendingFrame {
    fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.data.is_empty()
            && self.id.is_none()
            && !self.invalid_utf8
    }

    fn take(&mut self) -> RawFrame {
        let pending = std::mem::take(self);
        RawFrame {
            category: pending.category,
            data: pending.data.join("\n"),
            id: pending.id,
            invalid_utf8: pending.invalid_utf8,
        }
    }
}

/// Event-stream record decoder
#[derive(Debug)]
pub struct EventStreamCodec {
    max_frame_bytes: usize,
    pending: PendingFrame,
}

impl EventStreamCodec {
    pub fn new() -> Self {
        Self::with_max_frame_bytes(crate::DEFAULT_MAX_FRAME_BYTES)
    }

    /// A single record (all of its lines) may not exceed `max_frame_bytes`
    pub fn with_max_frame_bytes(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: PendingFrame::default(),
        }
    }

    fn push_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.pending.category = Some(value.to_string()),
            "data" => self.pending.data.push(value.to_string()),
            "id" => self.pending.id = Some(value.to_string()),
            _ => {}
        }
    }
}

impl Default for EventStreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventStreamCodec {
    type Item = RawFrame;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawFrame>, CodecError> {
        loop {
            let Some(newline) = buf.iter().position(|b| *b == b'\n') else {
                let buffered = self.pending.bytes + buf.len();
                if buffered > self.max_frame_bytes {
                    return Err(CodecError::FrameTooLarge(buffered));
                }
                return Ok(None);
            };

            let raw = buf.split_to(newline + 1);
            let mut line = &raw[..newline];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }

            if line.is_empty() {
                if self.pending.is_empty() {
                    // comment-only record
                    self.pending.bytes = 0;
                    continue;
                }
                return Ok(Some(self.pending.take()));
            }

            self.pending.bytes += line.len();
            if self.pending.bytes > self.max_frame_bytes {
                return Err(CodecError::FrameTooLarge(self.pending.bytes));
            }

            match std::str::from_utf8(line) {
                Ok(line) => self.push_line(line),
                Err(_) => self.pending.invalid_utf8 = true,
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RawFrame>, CodecError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        // A record cut off by the end of the stream is never dispatched
        if !buf.is_empty() || !self.pending.is_empty() {
            tracing::debug!(
                trailing_bytes = buf.len(),
                "Discarding incomplete event at end of stream"
            );
        }
        buf.clear();
        self.pending = PendingFrame::default();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn decode_all(input: &str) -> Vec<RawFrame> {
        let mut codec = EventStreamCodec::new();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_decode_single_record() {
        let frames = decode_all("event: instance\ndata: {\"type\":\"log\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].category.as_deref(), Some("instance"));
        assert_eq!(frames[0].data, "{\"type\":\"log\"}");
    }

    #[test]
    fn test_decode_incomplete() {
        let mut codec = EventStreamCodec::new();
        let mut buf = BytesMut::from("event: instance\ndata: {\"a\"");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":1}\r\n\r\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.data, "{\"a\":1}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiline_data_and_comments() {
        let frames = decode_all(": keep-alive\n\ndata: line one\ndata:line two\nid: 7\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].category, None);
    }

    #[test]
    fn test_decode_multiple() {
        let frames = decode_all("data: 1\n\ndata: 2\n\n\n\ndata: 3\n\n");
        let data: Vec<_> = frames.iter().map(|f| f.data.as_str()).collect();
        assert_eq!(data, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = EventStreamCodec::with_max_frame_bytes(16);
        let mut buf = BytesMut::from("data: 0123456789abcdef\n\n");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge(_)));
        assert!(!err.is_recoverable());

        // An unterminated line also counts against the limit
        let mut codec = EventStreamCodec::with_max_frame_bytes(8);
        let mut buf = BytesMut::from("data: 0123456789");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_invalid_utf8_is_flagged() {
        let mut codec = EventStreamCodec::new();
        let input: &[u8] = b"event: instance\ndata: {\"logs\":\"\xff\xfe\"}\n\ndata: 2\n\n";
        let mut buf = BytesMut::from(input);

        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert!(bad.invalid_utf8);
        assert_eq!(bad.category.as_deref(), Some("instance"));

        let good = codec.decode(&mut buf).unwrap().unwrap();
        assert!(!good.invalid_utf8);
        assert_eq!(good.data, "2");
    }

    #[test]
    fn test_keep_alives_do_not_accumulate() {
        let mut codec = EventStreamCodec::with_max_frame_bytes(32);
        let mut buf = BytesMut::from(": keep-alive\n\n".repeat(10).as_str());
        buf.extend_from_slice(b"data: ok\n\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.data, "ok");
    }

    #[tokio::test]
    async fn test_framed_read_discards_truncated_tail() {
        let input: &[u8] = b"event: a\ndata: 1\n\nevent: b\ndata: 2";
        let mut frames = FramedRead::new(input, EventStreamCodec::new());

        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.category.as_deref(), Some("a"));
        assert!(frames.next().await.is_none());
    }
}
