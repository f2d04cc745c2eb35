use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_CHAT_PATH: &str = "/api/v1/chat";

/// Identifier for one request/response exchange.
///
/// Allocated by the caller and echoed on every event so stale events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl ExchangeId {
    /// Creates a typed exchange id from a raw counter value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Where and how a transport reaches the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub base_url: String,
    pub chat_path: String,
    /// Covers connect plus response headers; body reads are governed by `chunk_idle_timeout`.
    pub request_timeout: Option<Duration>,
    pub chunk_idle_timeout: Option<Duration>,
}

impl TransportConfig {
    /// Creates a config for `base_url` with the default chat path and no timeouts.
    ///
    /// Surrounding whitespace and trailing slashes are removed.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            request_timeout: None,
            chunk_idle_timeout: None,
        }
    }

    /// Sets the endpoint path; blank falls back to the default, a missing leading `/` is added.
    pub fn with_chat_path(mut self, chat_path: impl Into<String>) -> Self {
        let chat_path = chat_path.into().trim().to_string();
        self.chat_path = if chat_path.is_empty() {
            DEFAULT_CHAT_PATH.to_string()
        } else if chat_path.starts_with('/') {
            chat_path
        } else {
            format!("/{chat_path}")
        };
        self
    }

    /// Bounds connect plus response headers.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Bounds the gap between two body chunks.
    pub fn with_chunk_idle_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_idle_timeout = Some(timeout);
        self
    }

    /// Full endpoint URL: base URL followed by the chat path.
    pub fn endpoint_url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    User,
    Assistant,
}

/// History entry as sent to the endpoint: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: String,
}

impl WireMessage {
    /// Creates a wire entry from a role and its content.
    pub fn new(role: WireRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request body `{ messages, context }`; the exchange id never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    #[serde(skip)]
    pub exchange_id: ExchangeId,
    pub messages: Vec<WireMessage>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ChatRequest {
    /// Creates a request carrying the ordered history and an empty context.
    pub fn new(exchange_id: ExchangeId, messages: Vec<WireMessage>) -> Self {
        Self {
            exchange_id,
            messages,
            context: serde_json::Map::new(),
        }
    }

    /// Replaces the context object sent alongside the history.
    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }
}

/// Transport-level progress of one exchange, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangePayload {
    /// Response headers arrived with a success status.
    Opened { status: u16 },
    /// Raw body bytes; chunk boundaries may split multi-byte characters.
    Chunk(Bytes),
    Done,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeEvent {
    pub exchange_id: ExchangeId,
    pub payload: ExchangePayload,
}

impl ExchangeEvent {
    /// Creates an event tagged with the exchange it belongs to.
    pub fn new(exchange_id: ExchangeId, payload: ExchangePayload) -> Self {
        Self {
            exchange_id,
            payload,
        }
    }
}

pub type TransportWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("chat endpoint '{endpoint}' is invalid: {details}"))]
    InvalidEndpoint {
        stage: &'static str,
        endpoint: String,
        details: String,
    },
    #[snafu(display("failed to build http client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat request failed on `{stage}`: {source}"))]
    SendRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("chat request timed out after {timeout:?} on `{stage}`"))]
    RequestTimeout {
        stage: &'static str,
        timeout: Duration,
        source: tokio::time::error::Elapsed,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`: {source}"))]
    ReadChunk {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("no response data for {idle:?} on `{stage}`"))]
    ChunkIdleTimeout {
        stage: &'static str,
        idle: Duration,
        source: tokio::time::error::Elapsed,
    },
}

/// Receiving half of one exchange. Dropping it asks the worker to stop.
pub struct ExchangeEventStream {
    exchange_id: ExchangeId,
    events: mpsc::UnboundedReceiver<ExchangeEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl ExchangeEventStream {
    pub(crate) fn new(
        exchange_id: ExchangeId,
        events: mpsc::UnboundedReceiver<ExchangeEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            exchange_id,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Next event, or `None` once the worker has dropped its sender.
    pub async fn recv(&mut self) -> Option<ExchangeEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ExchangeEvent> {
        self.events.try_recv().ok()
    }

    /// Asks the worker to stop. Returns false when already cancelled or the worker is gone.
    pub fn cancel(&mut self) -> bool {
        let delivered = self
            .cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);
        tracing::debug!(exchange_id = %self.exchange_id, delivered, "exchange cancel requested");
        delivered
    }
}

impl Drop for ExchangeEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            if cancel_tx.send(()).is_ok() {
                tracing::trace!(exchange_id = %self.exchange_id, "exchange stream dropped before worker finished");
            }
        }
    }
}

/// An opened exchange: the caller spawns `worker` and reads `stream`.
pub struct ExchangeHandle {
    pub stream: ExchangeEventStream,
    pub worker: TransportWorker,
}

pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;
    fn open_exchange(&self, request: ChatRequest) -> TransportResult<ExchangeHandle>;
}

/// Channel triple shared by every transport implementation, including test fakes.
pub fn make_event_stream(
    exchange_id: ExchangeId,
) -> (
    mpsc::UnboundedSender<ExchangeEvent>,
    ExchangeEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ExchangeEventStream::new(exchange_id, event_rx, cancel_tx),
        cancel_rx,
    )
}
