//! Incremental chat stream consumer and transcript reconciler.
//!
//! Bytes from a chat backend flow one way through the crate:
//!
//! network bytes → [`decoder`] (lines) → [`event`] (typed events)
//! → [`accumulator`] (growing text) → [`transcript`] (messages)
//!
//! [`session::SessionController`] owns that pipeline for one attempt at a
//! time, handles send/regenerate/cancel, and publishes snapshots for a UI.

pub mod accumulator;
pub mod cli;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod session;
pub mod transcript;
pub mod transport;

pub use accumulator::{Accumulated, Accumulator};
pub use config::ClientConfig;
pub use decoder::FrameDecoder;
pub use error::RegenError;
pub use event::{parse_line, StreamEvent};
pub use session::{AttemptHandle, AttemptOutcome, AttemptReport, Phase, SessionController, SessionSnapshot};
pub use transcript::{Message, Part, Role, Transcript, TranscriptError};
pub use transport::{ByteStream, ChatRequest, ChatTransport, HttpTransport};
