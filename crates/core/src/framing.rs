//! Newline-delimited JSON framing.
//!
//! Both the tool server's stdout and the completion endpoint's streaming body
//! arrive as arbitrary byte chunks carrying one JSON value per line. The
//! framer reassembles complete lines across chunk boundaries, including
//! boundaries that fall inside a multi-byte character.

use crate::error::FrameError;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Incremental splitter of a byte stream into JSON values.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline
    scanned: usize,
    dropped: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every value completed by it, in order.
    ///
    /// Whitespace-only lines are skipped. A line that is not valid JSON is
    /// logged and dropped; it never aborts the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            if let Some(value) = self.decode(start, end) {
                values.push(value);
            }
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        values
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<Value> {
        let end = self.buffer.len();
        let value = self.decode(0, end);
        self.buffer.clear();
        self.scanned = 0;
        value
    }

    /// Bytes buffered while waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// How many lines have been dropped as unparseable.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn decode(&mut self, start: usize, end: usize) -> Option<Value> {
        let line = &self.buffer[start..end];
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => Some(value),
            Err(e) => {
                self.dropped += 1;
                let err = FrameError {
                    line: String::from_utf8_lossy(line).trim().to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Dropping unparseable line");
                None
            }
        }
    }
}

/// Serialize one value as a single newline-terminated line.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_chunk_with_two_lines() {
        let mut framer = LineFramer::new();
        let values = framer.push(b"{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn split_at_every_byte_boundary() {
        let input = "{\"text\":\"héllo → 世界\"}\n{\"id\":7,\"ok\":true}\n".as_bytes();
        for split in 0..=input.len() {
            let mut framer = LineFramer::new();
            let mut values = framer.push(&input[..split]);
            values.extend(framer.push(&input[split..]));
            assert_eq!(
                values,
                vec![json!({"text": "héllo → 世界"}), json!({"id": 7, "ok": true})],
                "split at {split}"
            );
        }
    }

    #[test]
    fn byte_at_a_time() {
        let input = b"{\"x\":[1,2,3]}\n";
        let mut framer = LineFramer::new();
        let mut values = Vec::new();
        for byte in input {
            values.extend(framer.push(std::slice::from_ref(byte)));
        }
        assert_eq!(values, vec![json!({"x": [1, 2, 3]})]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut framer = LineFramer::new();
        let values = framer.push(b"\n   \n{\"a\":1}\r\n\n");
        assert_eq!(values, vec![json!({"a": 1})]);
        assert_eq!(framer.dropped(), 0);
    }

    #[test]
    fn garbage_line_is_dropped_and_stream_continues() {
        let mut framer = LineFramer::new();
        let values = framer.push(b"Traceback (most recent call last):\n{\"a\":1}\n");
        assert_eq!(values, vec![json!({"a": 1})]);
        assert_eq!(framer.dropped(), 1);
    }

    #[test]
    fn incomplete_line_stays_buffered() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"a\":").is_empty());
        assert_eq!(framer.pending_len(), 5);
        assert_eq!(framer.push(b"1}\n"), vec![json!({"a": 1})]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"{\"done\":true}").is_empty());
        assert_eq!(framer.finish(), Some(json!({"done": true})));
        assert_eq!(framer.finish(), None);
    }

    #[test]
    fn long_line_in_small_chunks_is_scanned_once() {
        let line = format!("{{\"text\": \"{}\"}}\n", "a".repeat(4096));
        let mut framer = LineFramer::new();
        let mut values = Vec::new();
        for piece in line.as_bytes().chunks(7) {
            values.extend(framer.push(piece));
            assert_eq!(framer.scanned, framer.pending_len());
        }
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["text"].as_str().map(str::len), Some(4096));
        assert_eq!(framer.pending_len(), 0);
    }

    #[test]
    fn encode_appends_newline() {
        let bytes = encode(&json!({"jsonrpc": "2.0"})).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
