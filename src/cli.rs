use std::future::Future;
use std::path::PathBuf;

use clap::Parser;

use crate::config::ClientConfig;
use crate::error::RegenError;
use crate::session::{AttemptHandle, AttemptReport, SessionController};
use crate::transcript::Message;
use crate::transport::ChatTransport;

#[derive(Parser, Debug)]
#[command(name = "regen-stream")]
#[command(version)]
#[command(about = "Terminal chat client with streaming answers, regenerate and stop")]
pub struct Args {
    /// Chat endpoint URL (overrides the config file)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// TOML config file with endpoint and timeouts
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Connect timeout in seconds (overrides the config file)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Log engine activity at debug level to stderr
    #[arg(long, short)]
    pub verbose: bool,
}

impl Args {
    /// Build the client config: file first, then flags on top.
    pub fn client_config(&self) -> Result<ClientConfig, RegenError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(secs) = self.connect_timeout {
            config = config.connect_timeout(std::time::Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Default tracing filter when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "regen_stream=debug"
        } else {
            "warn"
        }
    }
}

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Send(&'a str),
    Regenerate,
    Clear,
    Quit,
    Unknown(&'a str),
    Empty,
}

pub fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "/regen" | "/regenerate" => Command::Regenerate,
        "/clear" => Command::Clear,
        "/quit" | "/exit" => Command::Quit,
        other if other.starts_with('/') => Command::Unknown(other),
        text => Command::Send(text),
    }
}

/// Follow an attempt until it ends, handing each new piece of the live
/// answer to `on_text`.
///
/// When `interrupt` resolves the attempt is cancelled. It is pinned once and
/// polled across every wake-up, so a signal that lands while a delta is being
/// handled is still seen.
pub async fn follow_answer<T, I>(
    session: &SessionController<T>,
    handle: AttemptHandle,
    interrupt: I,
    mut on_text: impl FnMut(&str),
) -> AttemptReport
where
    T: ChatTransport,
    I: Future,
{
    let live_id = handle.attempt_id().to_string();
    let mut updates = session.subscribe();
    let mut emitted = 0usize;
    let mut interrupted = false;
    let wait = handle.wait();
    tokio::pin!(wait);
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            report = &mut wait => {
                if let Some(m) = session.transcript().get(&live_id) {
                    emit_suffix(&m.text(), &mut emitted, &mut on_text);
                }
                return report;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return wait.await;
                }
                let text = updates
                    .borrow_and_update()
                    .live
                    .as_ref()
                    .filter(|m| m.id == live_id)
                    .map(Message::text);
                if let Some(text) = text {
                    emit_suffix(&text, &mut emitted, &mut on_text);
                }
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                let _ = session.cancel();
            }
        }
    }
}

fn emit_suffix(text: &str, emitted: &mut usize, on_text: &mut impl FnMut(&str)) {
    if let Some(suffix) = text.get(*emitted..).filter(|s| !s.is_empty()) {
        on_text(suffix);
        *emitted = text.len();
    }
}
