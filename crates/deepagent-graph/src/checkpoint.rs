use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use deepagent_core::DeepAgentError;

/// Identifies which conversation/run a checkpoint belongs to.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: String,
}

impl CheckpointConfig {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
        }
    }
}

/// A snapshot of graph state taken between node executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub state: Value,
    pub next_node: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl Checkpoint {
    pub fn new(state: Value, next_node: Option<String>) -> Self {
        Self {
            state,
            next_node,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Persists graph checkpoints so a run can resume from the last completed
/// node, or a human-in-the-loop interrupt can be resumed later.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn put(&self, config: &CheckpointConfig, checkpoint: &Checkpoint) -> Result<(), DeepAgentError>;
    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, DeepAgentError>;
    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>, DeepAgentError>;
}

/// In-process checkpointer. Good enough for tests and single-process
/// deployments; a durable store would implement the same trait.
#[derive(Default)]
pub struct MemorySaver {
    store: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemorySaver {
    async fn put(&self, config: &CheckpointConfig, checkpoint: &Checkpoint) -> Result<(), DeepAgentError> {
        let mut store = self.store.write().await;
        store.entry(config.thread_id.clone()).or_default().push(checkpoint.clone());
        Ok(())
    }

    async fn get(&self, config: &CheckpointConfig) -> Result<Option<Checkpoint>, DeepAgentError> {
        let store = self.store.read().await;
        Ok(store.get(&config.thread_id).and_then(|v| v.last().cloned()))
    }

    async fn list(&self, config: &CheckpointConfig) -> Result<Vec<Checkpoint>, DeepAgentError> {
        let store = self.store.read().await;
        Ok(store.get(&config.thread_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_latest() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new("t1");
        saver
            .put(&config, &Checkpoint::new(serde_json::json!({"n": 1}), Some("a".into())))
            .await
            .unwrap();
        saver
            .put(&config, &Checkpoint::new(serde_json::json!({"n": 2}), Some("b".into())))
            .await
            .unwrap();
        let latest = saver.get(&config).await.unwrap().unwrap();
        assert_eq!(latest.next_node.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn list_returns_full_history_per_thread() {
        let saver = MemorySaver::new();
        let config = CheckpointConfig::new("t1");
        saver.put(&config, &Checkpoint::new(serde_json::json!(1), None)).await.unwrap();
        saver.put(&config, &Checkpoint::new(serde_json::json!(2), None)).await.unwrap();
        assert_eq!(saver.list(&config).await.unwrap().len(), 2);
        assert!(saver.list(&CheckpointConfig::new("other")).await.unwrap().is_empty());
    }
}
