//! Response decoding: raw byte chunks in, [`StreamEvent`]s out.
//!
//! All framings share one driver. Chunks are assembled into lines, each
//! complete line is handed to a [`LineDecoder`], and a line that fails to
//! parse is dropped without ending the stream. A framing that recognizes a
//! provider error pushes `StreamEvent::Error`, and the driver stops right
//! after it. Otherwise the driver appends exactly one `Done` when the bytes
//! run out (or the framing signals an explicit end marker) and one `Error` if
//! the byte source fails mid-read.

pub mod batchexecute;
pub mod json_lines;
pub mod sse;

pub use batchexecute::BatchExecuteDecoder;
pub use json_lines::JsonLinesDecoder;
pub use sse::SseDecoder;

use std::ops::ControlFlow;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::BridgeError;
use crate::types::StreamEvent;

/// Lazily decoded, single-consumer event sequence for one request.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Provider-specific framing for one complete line.
pub trait LineDecoder: Send {
    /// Decode one line, pushing any discovered events.
    ///
    /// Returning `Break` marks an explicit end-of-stream marker. A pushed
    /// `StreamEvent::Error` ends the stream without a `Done`.
    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> ControlFlow<()>;

    /// Flush state once the byte source is exhausted.
    fn finish(&mut self, _events: &mut Vec<StreamEvent>) {}
}

/// Assembles newline-delimited lines from arbitrarily split chunks.
///
/// Buffers bytes rather than text so a multi-byte character split across two
/// chunks is reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        for (offset, byte) in self.pending[scan_from..].iter().enumerate() {
            if *byte == b'\n' {
                let end = scan_from + offset;
                lines.push(to_line(&self.pending[start..end]));
                start = end + 1;
            }
        }
        self.pending.drain(..start);
        lines
    }

    /// Take the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(to_line(&rest))
    }
}

/// Error a provider reported inside a successful response, if any.
///
/// Recognizes `{"success": false, "data": {...}}` envelopes and non-null
/// `error` members (string or object). The message is taken from `details`,
/// then `code`, then `message`.
pub fn embedded_error(value: &Value) -> Option<String> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = value
            .get("data")
            .and_then(describe)
            .or_else(|| value.get("message").and_then(describe))
            .unwrap_or_else(|| "request rejected".to_string());
        return Some(message);
    }
    value
        .get("error")
        .filter(|error| !matches!(error, Value::Null | Value::Bool(false)))
        .map(|error| describe(error).unwrap_or_else(|| error.to_string()))
}

fn describe(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()).filter(|t| !t.is_empty()),
        Value::Number(code) => Some(code.to_string()),
        Value::Object(map) => ["details", "code", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(describe)),
        _ => None,
    }
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// Decode a byte stream into events with the given framing.
pub fn decode_stream<S, B, E, D>(bytes: S, mut decoder: D) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
    D: LineDecoder + 'static,
{
    let stream = async_stream::stream! {
        let mut buffer = LineBuffer::default();
        let mut events = Vec::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield StreamEvent::Error(err.into());
                    return;
                }
            };
            for line in buffer.push(chunk.as_ref()) {
                let flow = decoder.decode_line(&line, &mut events);
                for event in events.drain(..) {
                    let failed = matches!(event, StreamEvent::Error(_));
                    yield event;
                    if failed {
                        return;
                    }
                }
                if flow.is_break() {
                    yield StreamEvent::Done;
                    return;
                }
            }
        }

        let mut flow = ControlFlow::Continue(());
        if let Some(line) = buffer.finish() {
            flow = decoder.decode_line(&line, &mut events);
        }
        if flow.is_continue() {
            decoder.finish(&mut events);
        }
        for event in events.drain(..) {
            let failed = matches!(event, StreamEvent::Error(_));
            yield event;
            if failed {
                return;
            }
        }
        yield StreamEvent::Done;
    };
    Box::pin(stream)
}

/// Decode a fully buffered body with the same framing as a live stream.
pub fn decode_body<D>(body: String, decoder: D) -> EventStream
where
    D: LineDecoder + 'static,
{
    let once = futures::stream::once(async move { Ok::<_, BridgeError>(body.into_bytes()) });
    decode_stream(once, decoder)
}
