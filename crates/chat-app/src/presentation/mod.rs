//! Boundary between the chat controller and whatever draws it.

pub mod format;
pub mod shell;

use scrolltosco_client::ExchangeId;
use scrolltosco_storage::{Turn, TurnRole};
use tokio::sync::mpsc;

use crate::chat::SessionState;

pub use format::{BODY_INDENT, format_content, format_line};
pub use shell::{InlineShell, ModalShell, render_frame, render_turn_block};

/// Owned snapshot of everything a view needs: committed turns, live buffer, lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresentationFrame {
    pub turns: Vec<Turn>,
    pub live: Option<String>,
    pub state: SessionState,
}

impl PresentationFrame {
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Folds one update into the snapshot, mirroring the controller's own bookkeeping.
    pub fn apply(&mut self, update: &SessionUpdate) {
        match update {
            SessionUpdate::StateChanged { current, .. } => {
                self.state = *current;
                if !current.is_busy() {
                    self.live = None;
                }
            }
            SessionUpdate::TurnCommitted(turn) => {
                if turn.role == TurnRole::Assistant {
                    self.live = None;
                }
                self.turns.push(turn.clone());
            }
            SessionUpdate::LiveContent { content, .. } => {
                self.live = Some(content.clone());
            }
        }
    }
}

/// Change notification published by the controller, in the order changes happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    StateChanged {
        previous: SessionState,
        current: SessionState,
    },
    TurnCommitted(Turn),
    /// Full buffer content so far, not a delta.
    LiveContent {
        exchange_id: ExchangeId,
        content: String,
    },
}

pub trait SessionObserver {
    fn on_update(&mut self, update: &SessionUpdate);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_update(&mut self, _update: &SessionUpdate) {}
}

impl SessionObserver for mpsc::UnboundedSender<SessionUpdate> {
    fn on_update(&mut self, update: &SessionUpdate) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.send(update.clone());
    }
}
