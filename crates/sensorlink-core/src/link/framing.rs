//! Line framing
//!
//! Splits the device byte stream at `\n`. The delimiter is dropped, bytes
//! are decoded as UTF-8 (lossily) and trimmed. Blank lines are skipped and a
//! trailing partial line at end of stream is discarded rather than emitted.

use std::io;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::MAX_LINE_LENGTH;

/// `tokio_util` decoder producing one trimmed `String` per line
#[derive(Debug, Default)]
pub struct LineFramer {
    /// Offset already scanned for a delimiter
    next_index: usize,
    /// Dropping an over-long line until the next delimiter
    discarding: bool,
}

impl LineFramer {
    /// Create a new framer
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineFramer {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let start = self.next_index.min(buf.len());
            let Some(offset) = buf[start..].iter().position(|b| *b == b'\n') else {
                if buf.len() > MAX_LINE_LENGTH {
                    tracing::warn!(
                        "Discarding {} bytes without a line delimiter",
                        buf.len()
                    );
                    buf.clear();
                    self.discarding = true;
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let end = start + offset;
            let frame = buf.split_to(end + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if end > MAX_LINE_LENGTH {
                tracing::warn!("Dropping {end}-byte line over the {MAX_LINE_LENGTH}-byte limit");
                continue;
            }

            let line = String::from_utf8_lossy(&frame[..end]).trim().to_string();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if !buf.is_empty() {
            tracing::debug!("Dropping {} bytes of unterminated line at end of stream", buf.len());
            buf.clear();
        }
        self.next_index = 0;
        self.discarding = false;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drain(framer: &mut LineFramer, buf: &mut BytesMut) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = framer.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_splits_and_trims() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(&b"  first \r\nsecond\n\n   \nthi"[..]);

        assert_eq!(drain(&mut framer, &mut buf), vec!["first", "second"]);

        buf.extend_from_slice(b"rd\n");
        assert_eq!(drain(&mut framer, &mut buf), vec!["third"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_line_discarded_at_eof() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(&b"complete\npartial"[..]);

        assert_eq!(framer.decode_eof(&mut buf).unwrap(), Some("complete".to_string()));
        assert_eq!(framer.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(&b"temp \xff ok\n"[..]);
        assert_eq!(
            framer.decode(&mut buf).unwrap(),
            Some("temp \u{fffd} ok".to_string())
        );
    }

    #[test]
    fn test_overlong_line_resynchronises() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 1].as_slice());

        assert_eq!(framer.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail of the long line\nnext\n");
        assert_eq!(drain(&mut framer, &mut buf), vec!["next"]);
    }

    #[test]
    fn test_overlong_line_with_delimiter_is_dropped() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_LINE_LENGTH + 10].as_slice());
        buf.extend_from_slice(b"\nnext\n");

        assert_eq!(drain(&mut framer, &mut buf), vec!["next"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut framer = LineFramer::new();
        let mut buf = BytesMut::from(vec![b'y'; MAX_LINE_LENGTH].as_slice());
        buf.extend_from_slice(b"\n");

        let lines = drain(&mut framer, &mut buf);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_LENGTH);
    }
}
