//! Streaming event classifier.
//!
//! Consumes the raw byte stream of one upstream streaming call, splits it into
//! SSE lines, and decides per `data:` line whether the client sees it.
//!
//! - Answer and file events are forwarded byte-for-byte.
//! - `workflow_finished` is forwarded with its `outputs` normalized.
//! - Internal progress events are dropped.
//! - Unknown tags are dropped with a warning.
//! - An upstream `error` event ends the stream with [`RelayError::StreamEvent`].
//!
//! A frame that fails to parse is logged and skipped; the exchange continues.
//! Frames are decided one at a time, in arrival order, with nothing buffered
//! across frames beyond an incomplete trailing line. Dropping the returned
//! stream drops the upstream body, which aborts the HTTP call.

use futures::{Stream, StreamExt};
use serde_json::Value;

use super::FrameStream;
use super::events::{Disposition, RelayFrame, UpstreamEvent};
use super::outputs::normalize_payload_outputs;
use crate::error::{RelayError, Result};

const DATA_PREFIX: &str = "data:";

/// Longest frame excerpt written to logs.
const LOG_EXCERPT_CHARS: usize = 200;

/// Splits a byte stream into lines, tolerating arbitrary chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Append a chunk and return every line it completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Flush an unterminated trailing line, if any.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

fn excerpt(text: &str) -> String {
    text.chars().take(LOG_EXCERPT_CHARS).collect()
}

/// Per-line decision logic for one exchange.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    request_id: String,
}

impl EventClassifier {
    /// Create a classifier; `request_id` tags its log records.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    /// Decide what to do with one SSE line.
    ///
    /// `None` means the line produces nothing for the client.
    pub fn classify_line(&self, line: &str) -> Option<Result<RelayFrame>> {
        let data = line.strip_prefix(DATA_PREFIX)?.trim();
        if data.is_empty() {
            return None;
        }

        match UpstreamEvent::parse(data) {
            Ok(event) => self.classify(event, data),
            Err(err) => {
                tracing::warn!(
                    name: "stream.frame.dropped",
                    request_id = %self.request_id,
                    error = %err,
                    frame = %excerpt(data),
                    "Failed to parse upstream frame"
                );
                None
            }
        }
    }

    fn classify(&self, mut event: UpstreamEvent, data: &str) -> Option<Result<RelayFrame>> {
        match event.kind.disposition() {
            Disposition::Forward => {
                tracing::trace!(request_id = %self.request_id, event = %event.kind, "Forwarding frame");
                Some(Ok(RelayFrame::verbatim(event, data)))
            }
            Disposition::Transform => match normalize_payload_outputs(&mut event.payload) {
                Some(rendered) => {
                    tracing::debug!(
                        request_id = %self.request_id,
                        event = %event.kind,
                        rendered = %excerpt(&rendered),
                        "Normalized workflow outputs"
                    );
                    Some(Ok(RelayFrame::rewritten(event)))
                }
                None => {
                    tracing::debug!(
                        request_id = %self.request_id,
                        event = %event.kind,
                        "No usable outputs, forwarding original frame"
                    );
                    Some(Ok(RelayFrame::verbatim(event, data)))
                }
            },
            Disposition::Suppress => {
                tracing::trace!(request_id = %self.request_id, event = %event.kind, "Dropping internal event");
                None
            }
            Disposition::Reject => {
                tracing::warn!(
                    request_id = %self.request_id,
                    event = %event.tag(),
                    "Dropping unknown upstream event"
                );
                None
            }
            Disposition::Fail => {
                let error = stream_error(&event.payload);
                tracing::error!(request_id = %self.request_id, error = %error, "Upstream reported a stream error");
                Some(Err(error))
            }
        }
    }
}

fn stream_error(payload: &Value) -> RelayError {
    let field = |name: &str| payload.get(name).and_then(Value::as_str).map(ToString::to_string);
    RelayError::StreamEvent {
        code: field("code").unwrap_or_else(|| "unknown".to_string()),
        message: field("message").unwrap_or_else(|| payload.to_string()),
    }
}

/// Classify a raw upstream byte stream into client-bound frames.
///
/// The returned stream ends when the source ends, after the first source
/// error, or after an upstream `error` event.
pub fn classify_stream<S, B, E>(source: S, request_id: impl Into<String>) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<RelayError> + Send + 'static,
{
    Box::pin(classified(source, EventClassifier::new(request_id)))
}

fn classified<S, B, E>(
    source: S,
    classifier: EventClassifier,
) -> impl Stream<Item = Result<RelayFrame>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<RelayError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut framer = LineFramer::default();

        futures::pin_mut!(source);
        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(Into::<RelayError>::into)?;
            for line in framer.push(chunk.as_ref()) {
                if let Some(frame) = classifier.classify_line(&line) {
                    yield frame?;
                }
            }
        }

        if let Some(line) = framer.finish() {
            if let Some(frame) = classifier.classify_line(&line) {
                yield frame?;
            }
        }
    }
}
