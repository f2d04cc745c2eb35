use std::sync::Arc;

mod http;
mod transport;

pub use http::{HTTP_TRANSPORT_NAME, HttpChatTransport};
pub use transport::{
    ChatRequest, ChatTransport, DEFAULT_CHAT_PATH, ExchangeEvent, ExchangeEventStream,
    ExchangeHandle, ExchangeId, ExchangePayload, TransportConfig, TransportError,
    TransportResult, TransportWorker, WireMessage, WireRole, make_event_stream,
};

pub fn create_transport(config: TransportConfig) -> TransportResult<Arc<dyn ChatTransport>> {
    Ok(Arc::new(HttpChatTransport::new(config)?))
}
