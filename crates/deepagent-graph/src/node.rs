use async_trait::async_trait;

use deepagent_core::DeepAgentError;

use crate::command::NodeOutput;
use crate::state::State;

/// A single step in a compiled graph. Nodes are the unit of checkpointing,
/// caching and interrupt-before/after — each `process` call is expected to
/// be a coherent, resumable step (e.g. "call the model once", "run all
/// pending tool calls").
#[async_trait]
pub trait Node<S: State>: Send + Sync {
    async fn process(&self, state: S) -> Result<NodeOutput<S>, DeepAgentError>;
}
