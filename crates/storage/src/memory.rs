use std::collections::HashSet;

use snafu::ensure;

use super::error::{DuplicateIdSnafu, StorageResult};
use super::ids::TurnId;
use super::types::{NewTurn, Turn};

/// Append-only, in-memory conversation log for one chat session.
///
/// Turns keep insertion order for the lifetime of the log. There is no edit or delete path.
#[derive(Debug, Default, Clone)]
pub struct TurnLog {
    turns: Vec<Turn>,
    ids: HashSet<TurnId>,
}

impl TurnLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn with a freshly minted id and returns the committed record.
    pub fn push(&mut self, input: NewTurn) -> &Turn {
        let mut id = TurnId::new_v7();
        while self.ids.contains(&id) {
            id = TurnId::new_v7();
        }

        self.insert(Turn::new(id, input.role, input.content))
    }

    /// Appends a caller-built turn. Ids already present in the log are rejected.
    pub fn append(&mut self, turn: Turn) -> StorageResult<&Turn> {
        ensure!(
            !self.ids.contains(&turn.id),
            DuplicateIdSnafu {
                stage: "append-turn",
                entity: "turn",
                id: turn.id.to_string(),
            }
        );

        Ok(self.insert(turn))
    }

    /// Owned copy of the ordered history.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    fn insert(&mut self, turn: Turn) -> &Turn {
        self.ids.insert(turn.id);
        tracing::trace!(
            turn_id = %turn.id,
            role = turn.role.as_str(),
            content_len = turn.content.len(),
            position = self.turns.len(),
            "appended turn"
        );
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }
}
