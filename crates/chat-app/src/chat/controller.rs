use std::sync::Arc;

use scrolltosco_client::{
    ChatRequest, ChatTransport, ExchangeEvent, ExchangeEventStream, ExchangeId, ExchangePayload,
    WireMessage, WireRole,
};
use scrolltosco_storage::{NewTurn, SessionId, Turn, TurnLog, TurnRole};

use super::context::{ContextMap, DiagnosisContext, merge_context, merge_context_maps};
use super::decoder::Utf8StreamDecoder;
use super::session::{SessionState, SessionTransition};
use crate::presentation::{NoopObserver, PresentationFrame, SessionObserver, SessionUpdate};

/// Assistant turn committed whenever an exchange fails, whatever the cause.
pub const APOLOGY_TEXT: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Started(ExchangeId),
    /// Input was empty after trimming; nothing changed.
    IgnoredEmpty,
    /// Another exchange is in flight; nothing changed.
    IgnoredBusy,
    /// The transport refused the request; the apology turn was committed.
    Failed(ExchangeId),
}

/// Per-exchange state, owned by the controller and dropped on commit, failure or abandon.
struct ActiveExchange {
    id: ExchangeId,
    stream: ExchangeEventStream,
    decoder: Utf8StreamDecoder,
    buffer: String,
    chunk_count: usize,
}

/// Drives one chat session: the turn log, the single in-flight exchange and its live buffer.
///
/// Methods take `&mut self`, so the busy check and the state change it guards happen together.
/// Hosts sharing a controller across threads wrap it in a mutex.
pub struct ChatController {
    session_id: SessionId,
    transport: Arc<dyn ChatTransport>,
    log: TurnLog,
    context: Option<DiagnosisContext>,
    override_context: ContextMap,
    state: SessionState,
    exchange: Option<ActiveExchange>,
    next_exchange_id: u64,
    observer: Box<dyn SessionObserver + Send>,
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>, context: Option<DiagnosisContext>) -> Self {
        let session_id = SessionId::new_v7();
        tracing::debug!(
            %session_id,
            transport = transport.name(),
            context = context.as_ref().map(DiagnosisContext::kind),
            "chat session created"
        );

        Self {
            session_id,
            transport,
            log: TurnLog::new(),
            context,
            override_context: ContextMap::new(),
            state: SessionState::Idle,
            exchange: None,
            next_exchange_id: 1,
            observer: Box::new(NoopObserver),
        }
    }

    pub fn with_override_context(mut self, overrides: ContextMap) -> Self {
        self.override_context = overrides;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver + Send>) -> Self {
        self.observer = observer;
        self
    }

    /// Swaps the transport. An in-flight exchange is abandoned first.
    pub fn replace_transport(&mut self, transport: Arc<dyn ChatTransport>) {
        if self.state.is_busy() {
            self.abandon();
        }
        self.transport = transport;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    pub fn turns(&self) -> &[Turn] {
        self.log.turns()
    }

    /// Owned copy of the committed turns, in order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.log.snapshot()
    }

    /// Streamed content not yet committed, if any has arrived.
    pub fn live_content(&self) -> Option<&str> {
        self.exchange
            .as_ref()
            .map(|exchange| exchange.buffer.as_str())
            .filter(|buffer| !buffer.is_empty())
    }

    pub fn frame(&self) -> PresentationFrame {
        PresentationFrame {
            turns: self.snapshot(),
            live: self.live_content().map(str::to_string),
            state: self.state,
        }
    }

    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        self.submit_with_context(text, &ContextMap::new())
    }

    /// Starts an exchange. `overrides` win over both the extracted and the session override
    /// context on key collisions.
    ///
    /// Must be called inside a tokio runtime: the transport worker is spawned here.
    pub fn submit_with_context(&mut self, text: &str, overrides: &ContextMap) -> SubmitOutcome {
        let content = text.trim();
        if content.is_empty() {
            tracing::trace!(session_id = %self.session_id, "ignoring empty submit");
            return SubmitOutcome::IgnoredEmpty;
        }

        let exchange_id = ExchangeId::new(self.next_exchange_id);
        let sending = match self.state.apply(SessionTransition::Submit(exchange_id)) {
            Ok(next) => next,
            Err(rejection) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    ?rejection,
                    "ignoring submit while an exchange is in flight"
                );
                return SubmitOutcome::IgnoredBusy;
            }
        };
        self.next_exchange_id += 1;

        let user_turn = self.log.push(NewTurn::user(content)).clone();
        self.publish(SessionUpdate::TurnCommitted(user_turn));
        self.set_state(sending);

        let context = merge_context_maps(
            merge_context(self.context.as_ref(), &self.override_context),
            overrides,
        );
        let request = ChatRequest::new(exchange_id, self.wire_history()).with_context(context);

        tracing::debug!(
            session_id = %self.session_id,
            %exchange_id,
            message_count = request.messages.len(),
            context_keys = request.context.len(),
            "opening chat exchange"
        );

        match self.transport.open_exchange(request) {
            Ok(handle) => {
                tokio::spawn(handle.worker);
                self.exchange = Some(ActiveExchange {
                    id: exchange_id,
                    stream: handle.stream,
                    decoder: Utf8StreamDecoder::new(),
                    buffer: String::new(),
                    chunk_count: 0,
                });
                SubmitOutcome::Started(exchange_id)
            }
            Err(error) => {
                tracing::error!(
                    session_id = %self.session_id,
                    %exchange_id,
                    transport = self.transport.name(),
                    error = %error,
                    "failed to open chat exchange"
                );
                self.fail_exchange(exchange_id, error.to_string());
                SubmitOutcome::Failed(exchange_id)
            }
        }
    }

    /// Submits and waits until the exchange settles.
    pub async fn ask(&mut self, text: &str) -> SubmitOutcome {
        let outcome = self.submit(text);
        if matches!(outcome, SubmitOutcome::Started(_)) {
            self.drive().await;
        }
        outcome
    }

    /// Applies events in arrival order until the in-flight exchange commits or fails.
    ///
    /// Cancel-safe: dropping the future between events leaves the exchange resumable.
    pub async fn drive(&mut self) {
        while let Some(exchange) = self.exchange.as_mut() {
            let exchange_id = exchange.id;
            match exchange.stream.recv().await {
                Some(event) => self.apply_event(event),
                None => self.handle_stream_closed(exchange_id),
            }
        }
    }

    /// Applies every event already queued, without waiting. Returns how many were applied.
    pub fn pump_ready_events(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self
            .exchange
            .as_mut()
            .and_then(|exchange| exchange.stream.try_recv())
        {
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    pub fn apply_event(&mut self, event: ExchangeEvent) {
        let exchange_id = event.exchange_id;
        let is_current = self.state.accepts_events_for(exchange_id)
            && self.exchange.as_ref().map(|exchange| exchange.id) == Some(exchange_id);
        if !is_current {
            // Late events from an abandoned or finished exchange must never reach the buffer.
            tracing::debug!(
                session_id = %self.session_id,
                %exchange_id,
                state = self.state.name(),
                "dropping event for stale exchange"
            );
            return;
        }

        match event.payload {
            ExchangePayload::Opened { status } => {
                match self.state.apply(SessionTransition::Open(exchange_id)) {
                    Ok(next) => {
                        tracing::debug!(%exchange_id, status, "chat response opened");
                        self.set_state(next);
                    }
                    Err(rejection) => {
                        tracing::warn!(%exchange_id, ?rejection, "ignoring unexpected open event");
                    }
                }
            }
            ExchangePayload::Chunk(bytes) => self.apply_chunk(exchange_id, &bytes),
            ExchangePayload::Done => self.commit_exchange(exchange_id),
            ExchangePayload::Failed(message) => self.fail_exchange(exchange_id, message),
        }
    }

    /// Drops the in-flight exchange without committing anything. Returns false when idle.
    pub fn abandon(&mut self) -> bool {
        let Some(exchange_id) = self.state.active_exchange() else {
            return false;
        };

        let idle = match self.state.apply(SessionTransition::Abandon(exchange_id)) {
            Ok(next) => next,
            Err(rejection) => {
                tracing::debug!(%exchange_id, ?rejection, "nothing to abandon");
                return false;
            }
        };

        if let Some(mut exchange) = self.exchange.take() {
            exchange.stream.cancel();
            tracing::info!(
                session_id = %self.session_id,
                %exchange_id,
                discarded_len = exchange.buffer.len(),
                "chat exchange abandoned"
            );
        }

        self.set_state(idle);
        true
    }

    fn apply_chunk(&mut self, exchange_id: ExchangeId, bytes: &[u8]) {
        if let Err(rejection) = self.state.apply(SessionTransition::Chunk(exchange_id)) {
            tracing::warn!(%exchange_id, ?rejection, "ignoring chunk outside of streaming");
            return;
        }

        let Some(exchange) = self.exchange.as_mut() else {
            return;
        };
        exchange.chunk_count += 1;
        let decoded = exchange.decoder.decode(bytes);
        if decoded.is_empty() {
            // Only part of a character so far; nothing visible changed.
            return;
        }
        exchange.buffer.push_str(&decoded);
        let content = exchange.buffer.clone();

        self.publish(SessionUpdate::LiveContent {
            exchange_id,
            content,
        });
    }

    fn commit_exchange(&mut self, exchange_id: ExchangeId) {
        let idle = match self.state.apply(SessionTransition::Complete(exchange_id)) {
            Ok(next) => next,
            Err(rejection) => {
                tracing::warn!(%exchange_id, ?rejection, "stream finished before the response opened");
                self.fail_exchange(exchange_id, "stream finished before response opened".to_string());
                return;
            }
        };

        let Some(mut exchange) = self.exchange.take() else {
            return;
        };
        let tail = exchange.decoder.finish();
        exchange.buffer.push_str(&tail);
        let content = std::mem::take(&mut exchange.buffer);

        tracing::info!(
            session_id = %self.session_id,
            %exchange_id,
            chunk_count = exchange.chunk_count,
            content_len = content.len(),
            "committing assistant turn"
        );

        let assistant_turn = self.log.push(NewTurn::assistant(content)).clone();
        self.publish(SessionUpdate::TurnCommitted(assistant_turn));
        self.set_state(idle);
    }

    fn fail_exchange(&mut self, exchange_id: ExchangeId, message: String) {
        match self.state.apply(SessionTransition::Fail(exchange_id)) {
            Ok(erroring) => self.set_state(erroring),
            Err(rejection) => {
                tracing::debug!(%exchange_id, ?rejection, "ignoring failure for inactive exchange");
                return;
            }
        }

        let discarded_len = self
            .exchange
            .take()
            .map(|exchange| exchange.buffer.len())
            .unwrap_or_default();
        tracing::warn!(
            session_id = %self.session_id,
            %exchange_id,
            discarded_len,
            error = %message,
            "chat exchange failed"
        );

        let apology = self.log.push(NewTurn::assistant(APOLOGY_TEXT)).clone();
        self.publish(SessionUpdate::TurnCommitted(apology));

        let idle = self
            .state
            .apply(SessionTransition::Recover)
            .unwrap_or(SessionState::Idle);
        self.set_state(idle);
    }

    fn handle_stream_closed(&mut self, exchange_id: ExchangeId) {
        if self.state.accepts_events_for(exchange_id) {
            self.fail_exchange(
                exchange_id,
                "response stream ended before a terminal event".to_string(),
            );
        } else {
            self.exchange = None;
        }
    }

    /// Committed history as sent on the wire: role and content only.
    pub fn wire_history(&self) -> Vec<WireMessage> {
        self.log
            .turns()
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    TurnRole::User => WireRole::User,
                    TurnRole::Assistant => WireRole::Assistant,
                };
                WireMessage::new(role, turn.content.clone())
            })
            .collect()
    }

    fn set_state(&mut self, next: SessionState) {
        let previous = std::mem::replace(&mut self.state, next);
        if previous != next {
            tracing::debug!(
                session_id = %self.session_id,
                from = previous.name(),
                to = next.name(),
                "session state changed"
            );
            self.publish(SessionUpdate::StateChanged {
                previous,
                current: next,
            });
        }
    }

    fn publish(&mut self, update: SessionUpdate) {
        self.observer.on_update(&update);
    }
}
