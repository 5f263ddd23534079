//! Incremental SSE frame parser.
//!
//! Converts raw byte chunks into parsed events. Chunks may arrive in
//! arbitrary fragments; state is retained across calls and no event is
//! emitted until its terminating blank line has been seen.

use bytes::{Buf, BytesMut};

use crate::{Cursor, Event, StreamError, StreamResult};

/// Default cap on the accumulation buffer (1MB). A peer that never sends a
/// block terminator fails the attempt instead of growing memory unbounded.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Output of one parser pass, in wire order.
#[derive(Debug)]
pub enum ParserItem {
    /// A complete block was parsed.
    Event(Event),
    /// A malformed `id:` or `retry:` value; the field was ignored.
    FieldError(StreamError),
}

/// Stateful incremental decoder for the `text/event-stream` format.
///
/// The accumulation buffer holds raw undecoded bytes; blocks are only
/// decoded once their `\n\n` terminator is present, so multi-byte UTF-8
/// sequences are never torn by chunk boundaries.
#[derive(Debug)]
pub struct FrameParser {
    /// Buffer for bytes that do not yet form a complete block.
    buffer: BytesMut,
    /// Cap on the accumulation buffer.
    max_buffer_size: usize,
    /// Pending `event:` value for the current block (last write wins).
    event_type: Option<String>,
    /// Pending `data:` lines for the current block, already joined.
    data: String,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            event_type: None,
            data: String::new(),
        }
    }
}

impl FrameParser {
    /// Create a new parser with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with a custom accumulation buffer cap.
    #[must_use]
    pub fn with_max_buffer_size(limit: usize) -> Self {
        Self {
            max_buffer_size: limit,
            ..Self::default()
        }
    }

    /// Feed a chunk of bytes, draining every complete block it makes
    /// available.
    ///
    /// `id:` and `retry:` fields update the cursor as soon as they are
    /// parsed, even before their block is emitted. After each emitted event
    /// the cursor's `last_event_id` is incremented by one; a later explicit
    /// `id:` field overrides that local numbering.
    ///
    /// # Errors
    /// Returns [`StreamError::BufferOverflow`] when buffering the chunk
    /// would exceed the configured cap before a block terminator arrives.
    pub fn feed(&mut self, chunk: &[u8], cursor: &mut Cursor) -> StreamResult<Vec<ParserItem>> {
        let mut items = Vec::new();
        if chunk.is_empty() {
            return Ok(items);
        }
        if self.buffer.len() + chunk.len() > self.max_buffer_size {
            return Err(StreamError::BufferOverflow {
                size: self.buffer.len() + chunk.len(),
                limit: self.max_buffer_size,
            });
        }
        // The terminator can straddle the chunk boundary by at most one
        // byte; resume the scan there instead of from the buffer start.
        let mut search_from = self.buffer.len().saturating_sub(1);
        self.buffer.extend_from_slice(chunk);

        while let Some(end) = find_terminator(&self.buffer, search_from) {
            let block = self.buffer.split_to(end);
            self.buffer.advance(2);
            search_from = 0;

            let text = String::from_utf8_lossy(&block);
            for line in text.split('\n') {
                self.process_line(line, cursor, &mut items);
            }

            items.push(ParserItem::Event(Event {
                event: self.event_type.take(),
                data: std::mem::take(&mut self.data),
            }));
            cursor.last_event_id += 1;
        }

        Ok(items)
    }

    /// Process a single field line of a block.
    fn process_line(&mut self, line: &str, cursor: &mut Cursor, items: &mut Vec<ParserItem>) {
        // No colon, or colon first: comment or malformed line, skip.
        let Some(idx) = line.find(':') else { return };
        if idx == 0 {
            return;
        }
        let key = line[..idx].trim().to_ascii_lowercase();
        let value = line[idx + 1..].trim();

        match key.as_str() {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            "id" => match value.parse::<i64>() {
                Ok(id) => cursor.last_event_id = id,
                Err(_) => items.push(ParserItem::FieldError(StreamError::InvalidField {
                    field: "id",
                    value: value.to_string(),
                })),
            },
            "retry" => match value.parse::<i64>() {
                Ok(ms) => cursor.retry_cooldown_ms = ms,
                Err(_) => items.push(ParserItem::FieldError(StreamError::InvalidField {
                    field: "retry",
                    value: value.to_string(),
                })),
            },
            _ => {} // Unknown field, ignore
        }
    }
}

/// Find the offset of the `\n\n` block terminator at or after `from`.
fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer[from..]
        .windows(2)
        .position(|window| window == b"\n\n")
        .map(|offset| offset + from)
}
