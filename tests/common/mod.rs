//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use regen_stream::{ByteStream, ChatRequest, ChatTransport, Message, RegenError, Role, SessionSnapshot, Transcript};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Chunk = Result<Vec<u8>, RegenError>;

/// Transport whose response body is fed by hand through a channel.
pub struct ChannelTransport {
    body: Mutex<Option<mpsc::UnboundedReceiver<Chunk>>>,
    open_error: Mutex<Option<RegenError>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

/// Test-side end of a [`ChannelTransport`].
pub struct Feed {
    tx: mpsc::UnboundedSender<Chunk>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Feed {
    pub fn bytes(&self, bytes: &[u8]) {
        let _ = self.tx.send(Ok(bytes.to_vec()));
    }

    /// Send one complete `data:` frame.
    pub fn frame(&self, payload: &str) {
        self.bytes(format!("data: {payload}\n").as_bytes());
    }

    pub fn delta(&self, delta: &str) {
        self.frame(&serde_json::json!({"type": "text-delta", "id": "t0", "delta": delta}).to_string());
    }

    pub fn done(&self) {
        self.frame("[DONE]");
    }

    pub fn fail(&self, detail: &str) {
        let _ = self.tx.send(Err(RegenError::Stream { detail: detail.to_string() }));
    }

    /// End the body without a terminator.
    pub fn close(self) {}

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn channel_transport() -> (ChannelTransport, Feed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let transport = ChannelTransport {
        body: Mutex::new(Some(rx)),
        open_error: Mutex::new(None),
        requests: Arc::clone(&requests),
    };
    (transport, Feed { tx, requests })
}

/// Transport that rejects the request before any byte arrives.
pub fn failing_transport(error: RegenError) -> (ChannelTransport, Feed) {
    let (transport, feed) = channel_transport();
    *transport.open_error.lock().unwrap() = Some(error);
    (transport, feed)
}

impl ChatTransport for ChannelTransport {
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>> {
        self.requests.lock().unwrap().push(request);
        let result = match self.open_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => match self.body.lock().unwrap().take() {
                Some(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx)) as ByteStream),
                None => Err(RegenError::Connect { url: "channel".into(), detail: "body already taken".into() }),
            },
        };
        Box::pin(async move { result })
    }
}

/// `[A(user), B(assistant), C(user)]`
pub fn abc() -> Transcript {
    Transcript::from_messages(vec![
        Message::new("A", Role::User, "what is rust?"),
        Message::new("B", Role::Assistant, "a language"),
        Message::new("C", Role::User, "more please"),
    ])
}

/// Wait until a published snapshot satisfies `pred`.
pub async fn wait_for(
    updates: &mut watch::Receiver<SessionSnapshot>,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let snap = updates.borrow_and_update();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            updates.changed().await.expect("session dropped");
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}
