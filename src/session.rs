//! Session controller: runs one send/regenerate attempt end to end.
//!
//! ## Design
//! - All state (transcript, in-flight attempt, last error) sits behind one
//!   `Mutex`; every transcript mutation happens inside it.
//! - An attempt is a spawned task: bytes → [`FrameDecoder`] → [`parse_line`]
//!   → [`Accumulator`] → [`Transcript::apply_accumulation`].
//! - Before each mutation the task re-checks, under the lock, that its attempt
//!   is still the current one. `cancel()` clears the attempt under the same
//!   lock, so nothing from a cancelled attempt lands after `cancel()` returns.
//! - Readers get [`SessionSnapshot`]s via `snapshot()` or a `watch` channel.
//!   Messages before the live answer are shared between snapshots as one
//!   `Arc<[Message]>`; a delta only copies the live message.
//!
//! ## Attempt lifecycle
//! 1. `start` / `send` / `regenerate` → phase `InFlight`, fresh attempt id
//! 2. first text delta → assistant message appended under the attempt id
//! 3. later deltas → that message's text replaced with the accumulated text
//! 4. terminator, end of body, failure or `cancel` → phase `Idle`

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::accumulator::Accumulator;
use crate::decoder::FrameDecoder;
use crate::error::RegenError;
use crate::event::{parse_line, StreamEvent};
use crate::transcript::{Message, Role, Transcript};
use crate::transport::{ChatRequest, ChatTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InFlight,
}

/// Read-only view of the session handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Id the in-flight answer is (or will be) stored under.
    pub live_message_id: Option<String>,
    /// True once the first delta has landed; the loading indicator hides then.
    pub has_live_output: bool,
    /// Message of the last transport failure, cleared by the next start.
    pub last_error: Option<String>,
    /// Every message except the live answer.
    pub history: Arc<[Message]>,
    /// The answer being streamed, once its first delta has landed.
    pub live: Option<Message>,
}

impl SessionSnapshot {
    /// The whole transcript in order, live answer last.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.history.iter().chain(self.live.as_ref())
    }

    pub fn message_count(&self) -> usize {
        self.history.len() + usize::from(self.live.is_some())
    }

    /// Text of the live answer so far.
    pub fn live_text(&self) -> Option<String> {
        self.live.as_ref().map(Message::text)
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Terminator seen or the body ended cleanly.
    Completed,
    Cancelled,
    Failed(RegenError),
}

impl AttemptOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptOutcome::Completed)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AttemptOutcome::Cancelled)
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Completed => write!(f, "completed"),
            AttemptOutcome::Cancelled => write!(f, "cancelled"),
            AttemptOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct AttemptReport {
    pub attempt_id: String,
    pub outcome: AttemptOutcome,
    /// Text deltas folded in before the attempt ended.
    pub deltas: usize,
}

/// Handle to a running attempt.
pub struct AttemptHandle {
    attempt_id: String,
    join: JoinHandle<AttemptReport>,
}

impl AttemptHandle {
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Wait for the attempt to finish.
    ///
    /// A panic inside the attempt task is resumed on the caller.
    pub async fn wait(self) -> AttemptReport {
        match self.join.await {
            Ok(report) => report,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => AttemptReport {
                attempt_id: self.attempt_id,
                outcome: AttemptOutcome::Cancelled,
                deltas: 0,
            },
        }
    }
}

struct LiveAttempt {
    id: String,
    has_live_output: bool,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Default)]
struct State {
    transcript: Transcript,
    attempt: Option<LiveAttempt>,
    last_error: Option<String>,
    /// Shared copy of the messages before the live answer. Reset whenever
    /// that prefix changes.
    history: Option<Arc<[Message]>>,
}

impl State {
    fn snapshot(&mut self) -> SessionSnapshot {
        let live_id = self.attempt.as_ref().filter(|a| a.has_live_output).map(|a| a.id.as_str());
        let messages = self.transcript.messages();
        let (prefix, live) = match messages.split_last() {
            Some((last, rest)) if Some(last.id.as_str()) == live_id => (rest, Some(last.clone())),
            _ => (messages, None),
        };
        let history = Arc::clone(self.history.get_or_insert_with(|| Arc::from(prefix)));
        SessionSnapshot {
            phase: if self.attempt.is_some() { Phase::InFlight } else { Phase::Idle },
            live_message_id: self.attempt.as_ref().map(|a| a.id.clone()),
            has_live_output: live_id.is_some(),
            last_error: self.last_error.clone(),
            history,
            live,
        }
    }

    fn invalidate_history(&mut self) {
        self.history = None;
    }

    fn current_attempt(&mut self, attempt_id: &str) -> Option<&mut LiveAttempt> {
        self.attempt.as_mut().filter(|a| a.id == attempt_id)
    }
}

struct Inner {
    state: Mutex<State>,
    updates: watch::Sender<SessionSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &mut State) {
        self.updates.send_replace(state.snapshot());
    }

    /// Apply accumulated text for `attempt_id`. Returns false when the
    /// attempt is no longer current and the caller should stop.
    fn apply(&self, attempt_id: &str, text: &str, is_first: bool) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(attempt) = state.attempt.as_mut().filter(|a| a.id == attempt_id) else {
            return false;
        };
        match state.transcript.apply_accumulation(attempt_id, Role::Assistant, text, is_first) {
            Ok(()) => {
                if is_first {
                    attempt.has_live_output = true;
                }
            }
            Err(e) => warn!(attempt = %attempt_id, error = %e, "dropping accumulation"),
        }
        self.publish(state);
        true
    }

    /// Close out the attempt if it is still current. An attempt that was
    /// already cleared by `cancel` reports `Cancelled` whatever it ended with.
    fn finish(&self, attempt_id: &str, outcome: AttemptOutcome) -> AttemptOutcome {
        let mut state = self.lock();
        if state.current_attempt(attempt_id).is_none() {
            return AttemptOutcome::Cancelled;
        }
        state.attempt = None;
        state.invalidate_history();
        if let AttemptOutcome::Failed(e) = &outcome {
            warn!(attempt = %attempt_id, error = %e, "attempt failed");
            state.last_error = Some(e.to_string());
        }
        self.publish(&mut state);
        outcome
    }
}

/// Owns the transcript and drives attempts against a [`ChatTransport`].
pub struct SessionController<T> {
    transport: Arc<T>,
    inner: Arc<Inner>,
}

impl<T> Clone for SessionController<T> {
    fn clone(&self) -> Self {
        Self { transport: Arc::clone(&self.transport), inner: Arc::clone(&self.inner) }
    }
}

impl<T: ChatTransport> SessionController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_transcript(transport, Transcript::new())
    }

    pub fn with_transcript(transport: T, transcript: Transcript) -> Self {
        let mut state = State { transcript, ..State::default() };
        let (updates, _) = watch::channel(state.snapshot());
        Self {
            transport: Arc::new(transport),
            inner: Arc::new(Inner { state: Mutex::new(state), updates }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Receive a fresh snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.updates.subscribe()
    }

    pub fn transcript(&self) -> Transcript {
        self.inner.lock().transcript.clone()
    }

    pub fn phase(&self) -> Phase {
        if self.inner.lock().attempt.is_some() {
            Phase::InFlight
        } else {
            Phase::Idle
        }
    }

    /// Start an attempt against the current transcript.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<AttemptHandle, RegenError> {
        let mut state = self.inner.lock();
        self.begin(&mut state)
    }

    /// Append a user message and start an attempt for it.
    ///
    /// Blank input is ignored and yields `Ok(None)`.
    pub fn send(&self, text: &str) -> Result<Option<AttemptHandle>, RegenError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let mut state = self.inner.lock();
        if state.attempt.is_some() {
            return Err(RegenError::AlreadyInFlight);
        }
        state.transcript.push(Message::new(Uuid::new_v4().to_string(), Role::User, text));
        state.invalidate_history();
        self.begin(&mut state).map(Some)
    }

    /// Drop everything after `message_id` and request a fresh answer.
    pub fn regenerate(&self, message_id: &str) -> Result<AttemptHandle, RegenError> {
        let mut state = self.inner.lock();
        if state.attempt.is_some() {
            return Err(RegenError::AlreadyInFlight);
        }
        let removed = state
            .transcript
            .truncate_after(message_id)
            .map_err(|_| RegenError::MessageNotFound(message_id.to_string()))?;
        state.invalidate_history();
        debug!(message_id = %message_id, removed, "truncated transcript for regeneration");
        self.begin(&mut state)
    }

    /// Regenerate the answer to the most recent user message.
    pub fn regenerate_last(&self) -> Result<AttemptHandle, RegenError> {
        let id = {
            let state = self.inner.lock();
            if state.attempt.is_some() {
                return Err(RegenError::AlreadyInFlight);
            }
            state.transcript.last_user().map(|m| m.id.clone()).ok_or(RegenError::NoUserMessage)?
        };
        self.regenerate(&id)
    }

    /// Abort the in-flight attempt. Partial output stays in the transcript.
    pub fn cancel(&self) -> Result<(), RegenError> {
        let mut state = self.inner.lock();
        let mut attempt = state.attempt.take().ok_or(RegenError::NotInFlight)?;
        if let Some(tx) = attempt.cancel.take() {
            let _ = tx.send(());
        }
        info!(attempt = %attempt.id, partial = attempt.has_live_output, "attempt cancelled");
        state.invalidate_history();
        self.inner.publish(&mut state);
        Ok(())
    }

    /// Empty the transcript. Only allowed while idle.
    pub fn clear(&self) -> Result<(), RegenError> {
        let mut state = self.inner.lock();
        if state.attempt.is_some() {
            return Err(RegenError::AlreadyInFlight);
        }
        state.transcript.clear();
        state.last_error = None;
        state.invalidate_history();
        self.inner.publish(&mut state);
        Ok(())
    }

    fn begin(&self, state: &mut State) -> Result<AttemptHandle, RegenError> {
        if state.attempt.is_some() {
            return Err(RegenError::AlreadyInFlight);
        }
        let attempt_id = Uuid::new_v4().to_string();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        state.attempt = Some(LiveAttempt {
            id: attempt_id.clone(),
            has_live_output: false,
            cancel: Some(cancel_tx),
        });
        state.last_error = None;
        let request = ChatRequest { messages: state.transcript.messages().to_vec() };
        self.inner.publish(state);
        info!(attempt = %attempt_id, messages = request.messages.len(), "starting attempt");

        let join = tokio::spawn(run_attempt(
            Arc::clone(&self.inner),
            Arc::clone(&self.transport),
            attempt_id.clone(),
            request,
            cancel_rx,
        ));
        Ok(AttemptHandle { attempt_id, join })
    }
}

async fn run_attempt<T: ChatTransport>(
    inner: Arc<Inner>,
    transport: Arc<T>,
    attempt_id: String,
    request: ChatRequest,
    mut cancel_rx: oneshot::Receiver<()>,
) -> AttemptReport {
    let mut acc = Accumulator::new();
    let outcome = tokio::select! {
        biased;
        _ = &mut cancel_rx => AttemptOutcome::Cancelled,
        outcome = consume(&inner, transport.as_ref(), &attempt_id, request, &mut acc) => outcome,
    };
    let outcome = inner.finish(&attempt_id, outcome);
    info!(attempt = %attempt_id, deltas = acc.delta_count(), outcome = %outcome, "attempt finished");
    AttemptReport { attempt_id, outcome, deltas: acc.delta_count() }
}

async fn consume<T: ChatTransport>(
    inner: &Inner,
    transport: &T,
    attempt_id: &str,
    request: ChatRequest,
    acc: &mut Accumulator,
) -> AttemptOutcome {
    let mut stream = match transport.open(request).await {
        Ok(stream) => stream,
        Err(e) => return AttemptOutcome::Failed(e),
    };
    let mut decoder = FrameDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return AttemptOutcome::Failed(e),
        };
        for line in decoder.feed(&chunk) {
            if step(inner, attempt_id, acc, &line).is_break() {
                return AttemptOutcome::Completed;
            }
        }
    }
    if let Some(line) = decoder.finish() {
        let _ = step(inner, attempt_id, acc, &line);
    }
    AttemptOutcome::Completed
}

fn step(inner: &Inner, attempt_id: &str, acc: &mut Accumulator, line: &str) -> ControlFlow<()> {
    let event = parse_line(line);
    match &event {
        StreamEvent::Terminator => ControlFlow::Break(()),
        StreamEvent::Unrecognized => {
            trace!(attempt = %attempt_id, line, "ignoring frame");
            ControlFlow::Continue(())
        }
        StreamEvent::TextDelta { .. } => match acc.apply(&event) {
            Some(a) if !inner.apply(attempt_id, a.text, a.is_first) => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ByteStream;
    use futures_util::future::BoxFuture;

    /// Replies with a fixed body split into the given chunks.
    struct Fixed(Vec<&'static str>);

    impl ChatTransport for Fixed {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>> {
            let chunks: Vec<Result<Vec<u8>, RegenError>> =
                self.0.iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
            Box::pin(async move { Ok(Box::pin(futures_util::stream::iter(chunks)) as ByteStream) })
        }
    }

    /// Replies with whatever the test pushes through the channel.
    struct FromChannel(Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<Result<Vec<u8>, RegenError>>>>);

    impl ChatTransport for FromChannel {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>> {
            let rx = self.0.lock().unwrap().take().expect("opened twice");
            let stream = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
            Box::pin(async move { Ok(Box::pin(stream) as ByteStream) })
        }
    }

    async fn next_matching(
        updates: &mut watch::Receiver<SessionSnapshot>,
        pred: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        loop {
            {
                let snap = updates.borrow_and_update();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            updates.changed().await.unwrap();
        }
    }

    const HELLO: &[&str] = &[
        "data: {\"type\":\"text-delta\",\"delta\":\"Hel\"}\n",
        "data: {\"type\":\"text-delta\",\"delta\":\"lo\"}\n",
        "data: [DONE]\n",
    ];

    #[test]
    fn new_session_is_idle_and_empty() {
        let s = SessionController::new(Fixed(vec![]));
        let snap = s.snapshot();
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.live_message_id.is_none());
        assert!(!snap.has_live_output);
        assert_eq!(snap.message_count(), 0);
        assert!(snap.live.is_none());
    }

    #[test]
    fn cancel_while_idle_is_rejected() {
        let s = SessionController::new(Fixed(vec![]));
        assert!(matches!(s.cancel(), Err(RegenError::NotInFlight)));
    }

    #[test]
    fn regenerate_last_without_user_turn_is_rejected() {
        let s = SessionController::new(Fixed(vec![]));
        assert!(matches!(s.regenerate_last(), Err(RegenError::NoUserMessage)));
    }

    #[test]
    fn regenerate_unknown_id_leaves_transcript() {
        let t = Transcript::from_messages(vec![Message::new("u", Role::User, "q")]);
        let s = SessionController::with_transcript(Fixed(vec![]), t.clone());
        assert!(matches!(s.regenerate("nope"), Err(RegenError::MessageNotFound(_))));
        assert_eq!(s.transcript(), t);
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn blank_send_is_ignored() {
        let s = SessionController::new(Fixed(HELLO.to_vec()));
        assert!(s.send("   ").unwrap().is_none());
        assert!(s.transcript().is_empty());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn send_streams_answer_once() {
        let s = SessionController::new(Fixed(HELLO.to_vec()));
        let handle = s.send("  hi  ").unwrap().unwrap();
        let live_id = handle.attempt_id().to_string();
        let report = handle.wait().await;
        assert!(report.outcome.is_completed());
        assert_eq!(report.deltas, 2);

        let t = s.transcript();
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].role, Role::User);
        assert_eq!(t.messages()[0].text(), "hi");
        assert_eq!(t.messages()[1].id, live_id);
        assert_eq!(t.messages()[1].text(), "Hello");
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn frames_after_terminator_are_ignored() {
        let s = SessionController::new(Fixed(vec![
            "data: {\"type\":\"text-delta\",\"delta\":\"ok\"}\ndata: [DONE]\n",
            "data: {\"type\":\"text-delta\",\"delta\":\"late\"}\n",
        ]));
        s.send("q").unwrap().unwrap().wait().await;
        assert_eq!(s.transcript().last().unwrap().text(), "ok");
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let s = SessionController::new(Fixed(vec!["data: {\"type\":\"text-delta\",\"delta\":\"tail\"}"]));
        let report = s.send("q").unwrap().unwrap().wait().await;
        assert_eq!(report.deltas, 1);
        assert_eq!(s.transcript().last().unwrap().text(), "tail");
    }

    #[tokio::test]
    async fn stream_without_deltas_adds_no_message() {
        let s = SessionController::new(Fixed(vec!["data: {\"type\":\"start\"}\n", "data: [DONE]\n"]));
        let report = s.send("q").unwrap().unwrap().wait().await;
        assert!(report.outcome.is_completed());
        assert_eq!(s.transcript().len(), 1);
    }

    #[tokio::test]
    async fn delta_snapshots_share_history() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Vec<u8>, RegenError>>();
        let s = SessionController::new(FromChannel(Mutex::new(Some(rx))));
        let mut updates = s.subscribe();
        let handle = s.send("hi").unwrap().unwrap();

        let frame = |d: &str| -> Result<Vec<u8>, RegenError> {
            Ok(format!("data: {{\"type\":\"text-delta\",\"delta\":\"{d}\"}}\n").into_bytes())
        };
        tx.send(frame("He")).unwrap();
        let first = next_matching(&mut updates, |s| s.live_text().as_deref() == Some("He")).await;
        tx.send(frame("llo")).unwrap();
        let second = next_matching(&mut updates, |s| s.live_text().as_deref() == Some("Hello")).await;

        assert!(Arc::ptr_eq(&first.history, &second.history));
        assert_eq!(second.history.len(), 1);
        assert_eq!(second.message_count(), 2);
        let ids: Vec<&str> = second.messages().map(|m| m.id.as_str()).collect();
        assert_eq!(ids[1], handle.attempt_id());

        drop(tx);
        handle.wait().await;
        let done = s.snapshot();
        assert!(done.live.is_none());
        assert_eq!(done.history.len(), 2);
        assert_eq!(done.history[1].text(), "Hello");
    }

    /// Transport whose `open` panics inside the attempt task.
    struct Exploding;

    impl ChatTransport for Exploding {
        fn open(&self, _request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>> {
            panic!("transport exploded");
        }
    }

    #[tokio::test]
    #[should_panic(expected = "transport exploded")]
    async fn panic_in_attempt_task_reaches_waiter() {
        let s = SessionController::new(Exploding);
        s.send("hi").unwrap().unwrap().wait().await;
    }

    #[test]
    fn outcome_display() {
        assert_eq!(AttemptOutcome::Completed.to_string(), "completed");
        assert_eq!(AttemptOutcome::Cancelled.to_string(), "cancelled");
        let failed = AttemptOutcome::Failed(RegenError::Http { status: 500, body: "boom".into() });
        assert_eq!(failed.to_string(), "failed: HTTP 500: boom");
    }
}
