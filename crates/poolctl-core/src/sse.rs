//! Event-stream framing and batch event decoding.
//!
//! # Design
//! - Input is buffered until a full line is available; a blank line dispatches the pending frame.
//! - `\n`, `\r\n` and a bare `\r` all terminate a line.
//! - Byte chunks may split a UTF-8 sequence; the decoder buffers the tail.
//! - When the JSON payload has no `type`, the frame's `event:` name supplies it.
//! - Unknown kinds and keep-alive comments are dropped, never surfaced as errors.

use poolctl_models::{BatchDonePayload, BatchErrorPayload, BatchProgressPayload};
use serde_json::Value;
use tracing::{debug, warn};

use crate::batch::BatchEvent;

/// One dispatched event-stream message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the last `event:` line.
    pub event: Option<String>,
    /// Value of the last `id:` line.
    pub id: Option<String>,
    /// Reconnect delay in milliseconds.
    pub retry: Option<u64>,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Line-buffered event-stream reader.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending: PendingFrame,
}

impl SseParser {
    /// Append a chunk and return the frames it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.push_str(chunk);
        let mut frames = Vec::new();
        let mut cursor = 0;
        while let Some((line, consumed)) = next_line(&buffer[cursor..]) {
            frames.extend(self.accept_line(line));
            cursor += consumed;
        }
        buffer.drain(..cursor);
        self.buffer = buffer;
        frames
    }

    /// Dispatch whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        let last = if rest.is_empty() {
            None
        } else {
            self.accept_line(rest.trim_end_matches('\r'))
        };
        last.or_else(|| self.pending.dispatch())
    }

    fn accept_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.pending.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        self.pending.record(field, value);
        None
    }
}

/// Find the first complete line, returning it with the number of bytes to consume.
///
/// A trailing `\r` is held back until the next chunk shows whether `\n` follows.
fn next_line(buffer: &str) -> Option<(&str, usize)> {
    let end = buffer.find(['\n', '\r'])?;
    let bytes = buffer.as_bytes();
    let consumed = match (bytes[end], bytes.get(end + 1)) {
        (b'\r', None) => return None,
        (b'\r', Some(b'\n')) => end + 2,
        _ => end + 1,
    };
    Some((&buffer[..end], consumed))
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    data: Vec<String>,
}

impl PendingFrame {
    fn record(&mut self, field: &str, value: &str) {
        match field {
            "data" => self.data.push(value.to_owned()),
            "event" => self.event = Some(value.to_owned()),
            "id" if !value.contains('\0') => self.id = Some(value.to_owned()),
            "retry" => {
                if let Ok(millis) = value.parse() {
                    self.retry = Some(millis);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let PendingFrame {
            event,
            id,
            retry,
            data,
        } = std::mem::take(self);
        if event.is_none() && id.is_none() && retry.is_none() && data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event,
            id,
            retry,
            data: data.join("\n"),
        })
    }
}

/// Decode one frame into a batch event.
///
/// Returns `None` for keep-alives, unknown kinds and malformed payloads.
#[must_use]
pub fn decode_batch_event(frame: &SseFrame) -> Option<BatchEvent> {
    let data = frame.data.trim();
    let payload = if data.is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => value,
            Err(_) if frame.event.as_deref() == Some("error") => {
                return Some(BatchEvent::Error {
                    message: data.to_string(),
                });
            }
            Err(err) => {
                warn!(event = ?frame.event, error = %err, "batch stream frame is not JSON");
                return None;
            }
        }
    };
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| frame.event.clone())?;
    let decoded = match kind.as_str() {
        "snapshot" | "progress" => {
            let counters: BatchProgressPayload = from_payload(payload)?;
            if kind == "snapshot" {
                BatchEvent::Snapshot {
                    total: counters.total,
                    processed: counters.processed,
                }
            } else {
                BatchEvent::Progress {
                    total: counters.total,
                    processed: counters.processed,
                }
            }
        }
        "done" => {
            let done: BatchDonePayload = from_payload(payload)?;
            BatchEvent::Done {
                total: done.total,
                summary: done.result.and_then(|result| result.summary),
                warning: done.warning.filter(|text| !text.trim().is_empty()),
            }
        }
        "cancelled" => BatchEvent::Cancelled,
        "error" => {
            let error: BatchErrorPayload = from_payload(payload)?;
            BatchEvent::Error {
                message: error.text().unwrap_or("batch job failed").to_string(),
            }
        }
        other => {
            debug!(kind = other, "ignoring unknown batch event");
            return None;
        }
    };
    Some(decoded)
}

fn from_payload<T: serde::de::DeserializeOwned + Default>(payload: Value) -> Option<T> {
    if payload.is_null() {
        return Some(T::default());
    }
    match serde_json::from_value(payload) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            warn!(error = %err, "batch event payload did not match its kind");
            None
        }
    }
}

/// Byte-level decoder turning a response body into batch events.
#[derive(Debug, Default)]
pub struct BatchEventDecoder {
    parser: SseParser,
    carry: Vec<u8>,
}

impl BatchEventDecoder {
    /// Feed raw body bytes.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<BatchEvent> {
        self.carry.extend_from_slice(chunk);
        let complete = match std::str::from_utf8(&self.carry) {
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Ok(_) | Err(_) => self.carry.len(),
        };
        let tail = self.carry.split_off(complete);
        let head = std::mem::replace(&mut self.carry, tail);
        let text = String::from_utf8_lossy(&head).into_owned();
        self.push_str(&text)
    }

    /// Feed already-decoded text.
    pub fn push_str(&mut self, chunk: &str) -> Vec<BatchEvent> {
        self.parser
            .push(chunk)
            .iter()
            .filter_map(decode_batch_event)
            .collect()
    }

    /// Flush whatever the stream left unterminated.
    pub fn finish(&mut self) -> Option<BatchEvent> {
        if !self.carry.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.carry)).into_owned();
            self.parser.push(&rest);
        }
        self.parser.finish().as_ref().and_then(decode_batch_event)
    }
}
