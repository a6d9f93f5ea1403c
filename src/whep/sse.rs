//! Incremental `text/event-stream` decoder
//!
//! Bytes arrive in arbitrary chunks from the HTTP body; the decoder buffers
//! partial lines and yields complete events on each blank line. Lines may
//! end in LF, CRLF or a lone CR, and a CRLF pair may straddle two chunks.

use std::time::Duration;

use bytes::{Buf, BytesMut};

use crate::error::{AppError, Result};

/// Event type used when the server sends no `event:` field
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Longest line buffered while waiting for its terminator
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// A dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (`event:` field, `message` when absent)
    pub event: String,
    /// Payload; multiple `data:` lines are joined with `\n`
    pub data: String,
    /// Last event id seen on the stream at dispatch time
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
    /// Bytes of `buf` already known to contain no line terminator
    scanned: usize,
    pending_cr: bool,
    seen_first_line: bool,
    event_type: String,
    data: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, returning every event completed by it
    ///
    /// Fails once an unterminated line grows past [`MAX_LINE_LENGTH`]; the
    /// connection must then be dropped and the decoder reset.
    pub fn feed(&mut self, mut chunk: &[u8]) -> Result<Vec<SseEvent>> {
        let mut events = Vec::new();
        if chunk.is_empty() {
            return Ok(events);
        }

        if self.pending_cr {
            self.pending_cr = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.buf.extend_from_slice(chunk);

        while let Some(offset) = self.buf[self.scanned..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        {
            let line = self.buf.split_to(self.scanned + offset);
            self.scanned = 0;
            if self.buf[0] == b'\r' {
                match self.buf.get(1) {
                    Some(b'\n') => self.buf.advance(2),
                    Some(_) => self.buf.advance(1),
                    None => {
                        // The LF of a CRLF may be in the next chunk
                        self.buf.advance(1);
                        self.pending_cr = true;
                    }
                }
            } else {
                self.buf.advance(1);
            }

            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        self.scanned = self.buf.len();
        if self.scanned > MAX_LINE_LENGTH {
            return Err(AppError::EventStream(format!(
                "Line exceeds {} bytes without a terminator",
                MAX_LINE_LENGTH
            )));
        }

        Ok(events)
    }

    /// Reconnection delay most recently requested with `retry:`
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Drop partial state before reading a new connection
    ///
    /// The last event id and retry value survive reconnects.
    pub fn reset_connection(&mut self) {
        self.buf.clear();
        self.scanned = 0;
        self.pending_cr = false;
        self.seen_first_line = false;
        self.event_type.clear();
        self.data.clear();
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SseEvent> {
        let mut raw = raw;
        if !self.seen_first_line {
            self.seen_first_line = true;
            raw = raw.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(raw);
        }

        let line = String::from_utf8_lossy(raw);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.find(':') {
            Some(i) => {
                let value = &line[i + 1..];
                (&line[..i], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(ms) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(ms));
                    }
                }
            }
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = std::mem::take(&mut self.event_type);
        if self.data.is_empty() {
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        data.pop();

        Some(SseEvent {
            event: if event_type.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event_type
            },
            data,
            id: self.last_event_id.clone(),
        })
    }
}
