use deepagent_core::Message;
use serde::{Deserialize, Serialize};

/// A graph state type. Kept deliberately small: the engine only needs to
/// clone it between node executions and merge partial updates produced by a
/// `Command`. Everything else (serialization for checkpointing) is required
/// per-call via `where S: Serialize + DeserializeOwned` rather than baked
/// into the trait, so in-memory-only states can skip that bound.
pub trait State: Clone + Send + Sync + 'static {
    /// Apply `other` on top of `self`. Implementations define their own
    /// per-field reducer semantics (e.g. append-only message lists,
    /// monotone status upgrades) — this is not a blind overwrite.
    fn merge(&mut self, other: Self);
}

/// The minimal state shared by ReAct-style agents: just a message list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageState {
    pub messages: Vec<Message>,
}

impl MessageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl State for MessageState {
    fn merge(&mut self, other: Self) {
        for msg in other.messages {
            if let Some(remove_id) = msg.remove_id() {
                self.messages.retain(|m| m.id() != Some(remove_id));
            } else {
                self.messages.push(msg);
            }
        }
    }
}
