//! Crate-level error type.

use thiserror::Error;

/// Errors surfaced by the session controller, the transport and config loading.
///
/// Frame-level problems (bad JSON, unknown event kinds, invalid UTF-8) never
/// show up here; the decoder and parser absorb them.
#[derive(Debug, Error)]
pub enum RegenError {
    /// The request could not be sent or the connection could not be made.
    #[error("connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },

    /// The backend answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response body broke off before the stream completed.
    #[error("stream interrupted: {detail}")]
    Stream { detail: String },

    /// An attempt is already running for this session.
    #[error("an attempt is already in flight")]
    AlreadyInFlight,

    /// Cancel was requested while no attempt was running.
    #[error("no attempt is in flight")]
    NotInFlight,

    /// The referenced message is not in the transcript.
    #[error("message '{0}' not found in transcript")]
    MessageNotFound(String),

    /// Regenerate was requested but the transcript holds no user turn.
    #[error("transcript has no user message to regenerate from")]
    NoUserMessage,

    /// The config file could not be read or parsed.
    #[error("config error: {detail}")]
    Config { detail: String },
}

impl RegenError {
    /// True for failures of the network exchange itself. These are the only
    /// errors the presentation layer shows as "failed to regenerate".
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RegenError::Connect { .. } | RegenError::Http { .. } | RegenError::Stream { .. }
        )
    }
}
