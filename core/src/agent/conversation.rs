use crate::traits::{ChatMessage, Role};

/// A finished question/answer pair, as shown by the `history` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

/// Position in a [`Conversation`] to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    turns: usize,
    exchanges: usize,
}

/// Conversation state owned by the caller and lent to each run.
///
/// Turns are only appended. `clear` and `rollback` are the only ways to drop them.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatMessage>,
    exchanges: Vec<Exchange>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ChatMessage) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// The last `max` turns, moved forward so the window starts at a user
    /// message rather than in the middle of a tool exchange.
    pub fn recent(&self, max: usize) -> &[ChatMessage] {
        let mut start = self.turns.len().saturating_sub(max);
        while start < self.turns.len() {
            let turn = &self.turns[start];
            if turn.role == Role::User && !turn.is_tool_results() {
                break;
            }
            start += 1;
        }
        &self.turns[start..]
    }

    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.exchanges.push(Exchange {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            turns: self.turns.len(),
            exchanges: self.exchanges.len(),
        }
    }

    /// Drops everything appended since `checkpoint` was taken.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        self.turns.truncate(checkpoint.turns);
        self.exchanges.truncate(checkpoint.exchanges);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.exchanges.clear();
    }
}
