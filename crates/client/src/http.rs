use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::transport::{
    BuildClientSnafu, ChatRequest, ChatTransport, ChunkIdleTimeoutSnafu, ExchangeEvent,
    ExchangeHandle, ExchangeId, ExchangePayload, InvalidEndpointSnafu, ReadChunkSnafu,
    RequestTimeoutSnafu, ResponseStatusSnafu, SendRequestSnafu, TransportConfig, TransportError,
    TransportResult, TransportWorker, make_event_stream,
};

pub const HTTP_TRANSPORT_NAME: &str = "http";

// Error bodies are only surfaced in logs; keep them short.
const MAX_ERROR_BODY_CHARS: usize = 512;
/// Upper bound on reading a non-success body, applied even when no request timeout is set.
const ERROR_BODY_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Chat transport that POSTs JSON and reads the reply as a raw byte stream.
pub struct HttpChatTransport {
    config: TransportConfig,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChatTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        let endpoint = config.endpoint_url();
        ensure!(
            config.base_url.starts_with("http://") || config.base_url.starts_with("https://"),
            InvalidEndpointSnafu {
                stage: "http-transport-new",
                endpoint: endpoint.clone(),
                details: "base url must start with http:// or https://".to_string(),
            }
        );

        if let Err(error) = reqwest::Url::parse(&endpoint) {
            return InvalidEndpointSnafu {
                stage: "http-transport-parse-url",
                endpoint,
                details: error.to_string(),
            }
            .fail();
        }

        let client = reqwest::Client::builder().build().context(BuildClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_request(
        client: &reqwest::Client,
        endpoint: &str,
        request: &ChatRequest,
        request_timeout: Option<Duration>,
    ) -> TransportResult<reqwest::Response> {
        let send = client.post(endpoint).json(request).send();
        let response = match request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .context(RequestTimeoutSnafu {
                    stage: "send-chat-request",
                    timeout,
                })?,
            None => send.await,
        };
        let response = response.context(SendRequestSnafu {
            stage: "send-chat-request",
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::read_error_body(response, request_timeout).await;
            return ResponseStatusSnafu {
                stage: "chat-response-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    /// Reads the diagnostic body of a failed response. An unreadable or stalled body yields an
    /// empty string; the status alone fails the exchange.
    async fn read_error_body(
        response: reqwest::Response,
        request_timeout: Option<Duration>,
    ) -> String {
        let limit = request_timeout
            .map_or(ERROR_BODY_READ_TIMEOUT, |timeout| timeout.min(ERROR_BODY_READ_TIMEOUT));

        match tokio::time::timeout(limit, response.text()).await {
            Ok(Ok(body)) => body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            Ok(Err(error)) => {
                tracing::debug!(error = %error, "failed to read error response body");
                String::new()
            }
            Err(_) => {
                tracing::debug!(?limit, "error response body stalled");
                String::new()
            }
        }
    }

    async fn next_chunk<S>(
        body: &mut S,
        idle_timeout: Option<Duration>,
    ) -> TransportResult<Option<Bytes>>
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    {
        let next = match idle_timeout {
            Some(idle) => tokio::time::timeout(idle, body.next())
                .await
                .context(ChunkIdleTimeoutSnafu {
                    stage: "read-chat-chunk",
                    idle,
                })?,
            None => body.next().await,
        };

        next.transpose().context(ReadChunkSnafu {
            stage: "read-chat-chunk",
        })
    }

    fn emit_failure(
        event_tx: &mpsc::UnboundedSender<ExchangeEvent>,
        exchange_id: ExchangeId,
        error: TransportError,
    ) {
        let _ = event_tx.send(ExchangeEvent::new(
            exchange_id,
            ExchangePayload::Failed(error.to_string()),
        ));
    }

    async fn run_exchange_worker(
        client: reqwest::Client,
        endpoint: String,
        config: TransportConfig,
        request: ChatRequest,
        event_tx: mpsc::UnboundedSender<ExchangeEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let exchange_id = request.exchange_id;
        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(%exchange_id, "chat exchange cancelled before response");
                return;
            }
            response = Self::send_request(&client, &endpoint, &request, config.request_timeout) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(
                    %exchange_id,
                    endpoint = %endpoint,
                    error = %error,
                    "chat request failed"
                );
                Self::emit_failure(&event_tx, exchange_id, error);
                return;
            }
        };

        let status = response.status().as_u16();
        if event_tx
            .send(ExchangeEvent::new(
                exchange_id,
                ExchangePayload::Opened { status },
            ))
            .is_err()
        {
            return;
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut cancelled = false;
        let mut stream_failed = false;
        let mut chunk_count = 0_usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(%exchange_id, chunk_count, "chat exchange cancelled mid-stream");
                    break;
                }
                next = Self::next_chunk(&mut body, config.chunk_idle_timeout) => {
                    match next {
                        Ok(Some(chunk)) => {
                            if chunk.is_empty() {
                                continue;
                            }
                            chunk_count += 1;
                            if event_tx
                                .send(ExchangeEvent::new(exchange_id, ExchangePayload::Chunk(chunk)))
                                .is_err()
                            {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            stream_failed = true;
                            tracing::warn!(
                                %exchange_id,
                                chunk_count,
                                error = %error,
                                "chat response stream failed"
                            );
                            Self::emit_failure(&event_tx, exchange_id, error);
                            break;
                        }
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            tracing::debug!(%exchange_id, chunk_count, "chat response stream finished");
            let _ = event_tx.send(ExchangeEvent::new(exchange_id, ExchangePayload::Done));
        }
    }
}

impl ChatTransport for HttpChatTransport {
    fn name(&self) -> &str {
        HTTP_TRANSPORT_NAME
    }

    fn open_exchange(&self, request: ChatRequest) -> TransportResult<ExchangeHandle> {
        let (event_tx, stream, cancel_rx) = make_event_stream(request.exchange_id);
        let worker: TransportWorker = Box::pin(Self::run_exchange_worker(
            self.client.clone(),
            self.endpoint.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ExchangeHandle { stream, worker })
    }
}
