//! Incremental decoder for the `text/event-stream` wire format.
//!
//! Bytes are pushed in arbitrary chunks as they come off the socket; complete
//! messages are queued and popped with [`SseDecoder::next_frame`]. Format:
//! - `data: <text>` appends a data line, multiple lines are joined with `\n`
//! - `event: <name>` and `id: <id>` annotate the pending message
//! - `retry: <ms>` updates the reconnection hint
//! - lines starting with `:` are comments (the feed's keep-alives)
//! - a blank line dispatches the pending message
//! - a UTF-8 byte order mark opening the stream is dropped

use std::collections::VecDeque;
use std::time::Duration;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One dispatched server-sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    // A chunk ended on '\r': a '\n' opening the next chunk belongs to the same line break
    pending_cr: bool,
    // Set once the first line ended, the BOM can only open the stream
    past_first_line: bool,
    data: String,
    event: Option<String>,
    last_event_id: Option<String>,
    retry: Option<Duration>,
    ready: VecDeque<Frame>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' => self.end_line(),
                b'\r' => {
                    self.pending_cr = true;
                    self.end_line();
                }
                _ => self.line.push(byte),
            }
        }
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        self.ready.pop_front()
    }

    /// Reconnection delay last advertised by the server.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn end_line(&mut self) {
        let line = std::mem::take(&mut self.line);
        let mut bytes = line.as_slice();
        if !self.past_first_line {
            self.past_first_line = true;
            bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        }
        let line = String::from_utf8_lossy(bytes);
        self.process_line(&line);
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }

        let mut data = std::mem::take(&mut self.data);
        data.pop();
        self.ready.push_back(Frame {
            event,
            id: self.last_event_id.clone(),
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&str]) -> Vec<Frame> {
        let mut decoder = SseDecoder::default();
        let mut frames = Vec::new();
        for chunk in chunks {
            decoder.push(chunk.as_bytes());
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
        }
        frames
    }

    #[test]
    fn test_single_message() {
        let frames = decode_all(&["event: message\nid: [{\"offset\":1}]\ndata: {\"type\":\"new\"}\n\n"]);
        assert_eq!(
            frames,
            vec![Frame {
                event: Some("message".to_string()),
                id: Some("[{\"offset\":1}]".to_string()),
                data: "{\"type\":\"new\"}".to_string(),
            }]
        );
    }

    #[test]
    fn test_message_split_across_chunks() {
        let frames = decode_all(&["da", "ta: {\"id\":", "1}\r", "\n", "\r\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"id\":1}");
    }

    #[test]
    fn test_multiline_data_is_joined() {
        let frames = decode_all(&["data: first\ndata:second\ndata\n\n"]);
        assert_eq!(frames[0].data, "first\nsecond\n");
    }

    #[test]
    fn test_comments_and_unknown_fields_are_ignored() {
        let frames = decode_all(&[": keep-alive\n\nfoo: bar\ndata: x\n\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_event_name_resets_but_id_persists() {
        let frames = decode_all(&["event: a\nid: 1\ndata: x\n\ndata: y\n\n"]);
        assert_eq!(frames[0].event.as_deref(), Some("a"));
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[1].id.as_deref(), Some("1"));
    }

    #[test]
    fn test_message_without_data_is_not_dispatched() {
        let frames = decode_all(&["event: ping\n\n"]);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_incomplete_trailing_message_is_held_back() {
        let frames = decode_all(&["data: complete\n\ndata: partial\n"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "complete");
    }

    #[test]
    fn test_retry_hint() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"retry: 3000\n\nretry: soon\n\n");
        assert_eq!(decoder.retry(), Some(Duration::from_millis(3000)));
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_leading_bom_is_stripped() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"\xEF\xBB");
        decoder.push(b"\xBFdata: first\n\n\xEF\xBB\xBFdata: second\n\n");

        assert_eq!(decoder.next_frame().unwrap().data, "first");
        // Only the stream's first line may carry it
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut decoder = SseDecoder::default();
        decoder.push(b"data: \xff\n\n");
        assert_eq!(decoder.next_frame().unwrap().data, "\u{FFFD}");
    }
}
