//! Event parser: one decoded line in, one typed [`StreamEvent`] out.
//!
//! The parser is deliberately permissive. Anything that is not a well-formed
//! `text-delta` frame or the `[DONE]` sentinel becomes
//! [`StreamEvent::Unrecognized`], so new event kinds from the backend pass
//! through without breaking the consumer.

use serde::Deserialize;

/// Prefix that marks a line as carrying a payload.
pub const FRAME_PREFIX: &str = "data:";

/// Payload of the termination frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A classified stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental fragment of answer text. Never empty.
    TextDelta { delta: String },
    /// The backend signalled the end of meaningful events.
    Terminator,
    /// Anything else: foreign lines, bad JSON, other event types.
    Unrecognized,
}

// -- Wire types ---------------------------------------------------------------

/// The subset of the UI message stream protocol this crate understands.
///
/// Frames look like `{"type":"text-delta","id":"t0","delta":"Hel"}`; extra
/// fields are ignored and every other `type` maps to `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireFrame {
    #[serde(rename = "text-delta")]
    TextDelta { delta: String },
    #[serde(other)]
    Other,
}

/// Classify one line. Never fails.
pub fn parse_line(line: &str) -> StreamEvent {
    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        return StreamEvent::Unrecognized;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload == DONE_SENTINEL {
        return StreamEvent::Terminator;
    }

    match serde_json::from_str::<WireFrame>(payload) {
        Ok(WireFrame::TextDelta { delta }) if !delta.is_empty() => StreamEvent::TextDelta { delta },
        Ok(_) => StreamEvent::Unrecognized,
        Err(e) => {
            tracing::trace!(error = %e, "ignoring malformed frame");
            StreamEvent::Unrecognized
        }
    }
}
