//! Outbound chat request and the byte-stream seam the session reads from.
//!
//! [`ChatTransport`] is what the session controller talks to. The real
//! implementation is [`HttpTransport`]; tests plug in in-memory streams.
//! Dropping the returned [`ByteStream`] stops reading and releases the
//! underlying connection, which is how cancellation reaches the network.

use std::pin::Pin;

use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::error::RegenError;
use crate::transcript::Message;

/// Raw response body chunks, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RegenError>> + Send>>;

/// Body of the outbound `POST`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

pub trait ChatTransport: Send + Sync + 'static {
    /// Issue the request and resolve once response headers have arrived.
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>>;
}

/// Streams chat responses over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, RegenError> {
        let mut builder = Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| RegenError::Config { detail: e.to_string() })?;
        Ok(Self { client, endpoint: config.endpoint.clone() })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatTransport for HttpTransport {
    fn open(&self, request: ChatRequest) -> BoxFuture<'static, Result<ByteStream, RegenError>> {
        let client = self.client.clone();
        let url = self.endpoint.clone();
        Box::pin(async move {
            let response = client
                .post(&url)
                .header("Accept", "text/event-stream")
                .json(&request)
                .send()
                .await
                .map_err(|e| RegenError::Connect { url: url.clone(), detail: e.to_string() })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(RegenError::Http { status: status.as_u16(), body });
            }

            let stream = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| RegenError::Stream { detail: e.to_string() })
            });
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}
