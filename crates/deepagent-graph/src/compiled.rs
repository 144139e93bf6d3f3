use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::Stream;
use serde_json::Value;
use tokio::sync::RwLock;

use deepagent_core::DeepAgentError;

use crate::checkpoint::{Checkpoint, CheckpointConfig, Checkpointer};
use crate::command::{CommandGoto, GraphResult, NodeOutput};
use crate::edge::{ConditionalEdge, Edge};
use crate::node::Node;
use crate::state::State;
use crate::END;

/// Cache policy for node-level caching.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: Duration,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

/// Cached node output with expiry.
pub(crate) struct CachedEntry<S: State> {
    output: NodeOutput<S>,
    created: Instant,
    ttl: Duration,
}

impl<S: State> CachedEntry<S> {
    fn is_valid(&self) -> bool {
        self.created.elapsed() < self.ttl
    }
}

/// Hash a serializable state to use as a cache key.
fn hash_state(value: &Value) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

/// Controls what is yielded during graph streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Yield full state after each node executes.
    Values,
    /// Yield the pre-node state, so callers can diff against a Values event.
    Updates,
    /// Same payload as Values — callers filter for AI messages themselves.
    Messages,
    /// Yield detailed debug information including node timing.
    Debug,
    /// Yield custom events emitted via a StreamWriter.
    Custom,
}

/// An event yielded during graph streaming.
#[derive(Debug, Clone)]
pub struct GraphEvent<S> {
    pub node: String,
    pub state: S,
}

/// An event yielded during multi-mode streaming, tagged with its stream mode.
#[derive(Debug, Clone)]
pub struct MultiGraphEvent<S> {
    pub mode: StreamMode,
    pub event: GraphEvent<S>,
}

pub type GraphStream<'a, S> =
    Pin<Box<dyn Stream<Item = Result<GraphEvent<S>, DeepAgentError>> + Send + 'a>>;

pub type MultiGraphStream<'a, S> =
    Pin<Box<dyn Stream<Item = Result<MultiGraphEvent<S>, DeepAgentError>> + Send + 'a>>;

/// The compiled, executable graph.
pub struct CompiledGraph<S: State> {
    pub(crate) nodes: HashMap<String, Box<dyn Node<S>>>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) conditional_edges: Vec<ConditionalEdge<S>>,
    pub(crate) entry_point: String,
    pub(crate) interrupt_before: HashSet<String>,
    pub(crate) interrupt_after: HashSet<String>,
    pub(crate) checkpointer: Option<Arc<dyn Checkpointer>>,
    pub(crate) cache_policies: HashMap<String, CachePolicy>,
    #[allow(clippy::type_complexity)]
    pub(crate) cache: Arc<RwLock<HashMap<String, HashMap<u64, CachedEntry<S>>>>>,
    pub(crate) deferred: HashSet<String>,
}

impl<S: State> std::fmt::Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("entry_point", &self.entry_point)
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.edges.len())
            .field("conditional_edge_count", &self.conditional_edges.len())
            .finish()
    }
}

/// Processes a `NodeOutput`, applying any state update, and returns
/// `(next_node_override, interrupt_value)`.
fn handle_node_output<S: State>(
    output: NodeOutput<S>,
    state: &mut S,
    current_node: &str,
    find_next: impl Fn(&str, &S) -> String,
) -> (Option<String>, Option<Value>) {
    match output {
        NodeOutput::State(new_state) => {
            *state = new_state;
            (None, None)
        }
        NodeOutput::Command(cmd) => {
            if let Some(update) = cmd.update {
                state.merge(update);
            }

            if let Some(interrupt_value) = cmd.interrupt_value {
                return (None, Some(interrupt_value));
            }

            match cmd.goto {
                Some(CommandGoto::One(target)) => (Some(target), None),
                Some(CommandGoto::Many(_sends)) => {
                    // Full parallel fan-out isn't implemented; the main loop
                    // treats this as end-of-run rather than truly scheduling
                    // each Send target.
                    (Some("__fanout__".to_string()), None)
                }
                None => (Some(find_next(current_node, state)), None),
            }
        }
    }
}

fn make_checkpoint<S: serde::Serialize>(
    state: &S,
    next_node: Option<String>,
    node_name: &str,
) -> Result<Checkpoint, DeepAgentError> {
    let state_val = serde_json::to_value(state)
        .map_err(|e| DeepAgentError::Graph(format!("serialize state: {e}")))?;
    Ok(Checkpoint::new(state_val, next_node).with_metadata("source", serde_json::json!(node_name)))
}

impl<S: State> CompiledGraph<S> {
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub async fn invoke(&self, state: S) -> Result<GraphResult<S>, DeepAgentError>
    where
        S: serde::Serialize + serde::de::DeserializeOwned,
    {
        self.invoke_with_config(state, None).await
    }

    pub async fn invoke_with_config(
        &self,
        mut state: S,
        config: Option<CheckpointConfig>,
    ) -> Result<GraphResult<S>, DeepAgentError>
    where
        S: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut resume_from: Option<String> = None;
        if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
            if let Some(checkpoint) = checkpointer.get(cfg).await? {
                state = serde_json::from_value(checkpoint.state).map_err(|e| {
                    DeepAgentError::Graph(format!("failed to deserialize checkpoint state: {e}"))
                })?;
                resume_from = checkpoint.next_node;
            }
        }

        let mut current_node = resume_from.unwrap_or_else(|| self.entry_point.clone());
        let mut max_iterations = 100;

        loop {
            if current_node == END {
                break;
            }
            if max_iterations == 0 {
                return Err(DeepAgentError::Graph(
                    "max iterations (100) exceeded — possible infinite loop".to_string(),
                ));
            }
            max_iterations -= 1;

            if self.interrupt_before.contains(&current_node) {
                if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                    let checkpoint = make_checkpoint(&state, Some(current_node.clone()), &current_node)?;
                    checkpointer.put(cfg, &checkpoint).await?;
                }
                return Ok(GraphResult::Interrupted {
                    state,
                    interrupt_value: serde_json::json!({
                        "reason": format!("interrupted before node '{current_node}'")
                    }),
                });
            }

            let node = self
                .nodes
                .get(&current_node)
                .ok_or_else(|| DeepAgentError::Graph(format!("node '{current_node}' not found")))?;
            let output = self
                .execute_with_cache(&current_node, node.as_ref(), state.clone())
                .await?;

            let (next_override, interrupt_value) =
                handle_node_output(output, &mut state, &current_node, |cur, s| self.find_next_node(cur, s));

            if let Some(interrupt_val) = interrupt_value {
                if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                    let next = self.find_next_node(&current_node, &state);
                    let checkpoint = make_checkpoint(&state, Some(next), &current_node)?;
                    checkpointer.put(cfg, &checkpoint).await?;
                }
                return Ok(GraphResult::Interrupted {
                    state,
                    interrupt_value: interrupt_val,
                });
            }

            if next_override.as_deref() == Some("__fanout__") {
                break;
            }

            let next = if let Some(target) = next_override {
                target
            } else {
                if self.interrupt_after.contains(&current_node) {
                    let next = self.find_next_node(&current_node, &state);
                    if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                        let checkpoint = make_checkpoint(&state, Some(next), &current_node)?;
                        checkpointer.put(cfg, &checkpoint).await?;
                    }
                    return Ok(GraphResult::Interrupted {
                        state,
                        interrupt_value: serde_json::json!({
                            "reason": format!("interrupted after node '{current_node}'")
                        }),
                    });
                }
                self.find_next_node(&current_node, &state)
            };

            if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                let checkpoint = make_checkpoint(&state, Some(next.clone()), &current_node)?;
                checkpointer.put(cfg, &checkpoint).await?;
            }

            current_node = next;
        }

        Ok(GraphResult::Complete(state))
    }

    /// Stream graph execution, yielding a `GraphEvent` after each node.
    pub fn stream(&self, state: S, mode: StreamMode) -> GraphStream<'_, S>
    where
        S: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        self.stream_with_config(state, mode, None)
    }

    pub fn stream_with_config(
        &self,
        state: S,
        _mode: StreamMode,
        config: Option<CheckpointConfig>,
    ) -> GraphStream<'_, S>
    where
        S: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        Box::pin(async_stream::stream! {
            let mut state = state;

            let mut resume_from: Option<String> = None;
            if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                match checkpointer.get(cfg).await {
                    Ok(Some(checkpoint)) => {
                        match serde_json::from_value(checkpoint.state) {
                            Ok(s) => {
                                state = s;
                                resume_from = checkpoint.next_node;
                            }
                            Err(e) => {
                                yield Err(DeepAgentError::Graph(format!(
                                    "failed to deserialize checkpoint state: {e}"
                                )));
                                return;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let mut current_node = resume_from.unwrap_or_else(|| self.entry_point.clone());
            let mut max_iterations = 100;

            loop {
                if current_node == END {
                    break;
                }
                if max_iterations == 0 {
                    yield Err(DeepAgentError::Graph(
                        "max iterations (100) exceeded — possible infinite loop".to_string(),
                    ));
                    return;
                }
                max_iterations -= 1;

                if self.interrupt_before.contains(&current_node) {
                    if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                        match make_checkpoint(&state, Some(current_node.clone()), &current_node) {
                            Ok(checkpoint) => {
                                if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                    yield Err(e);
                                    return;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    yield Err(DeepAgentError::Graph(format!(
                        "interrupted before node '{current_node}'"
                    )));
                    return;
                }

                let node = match self.nodes.get(&current_node) {
                    Some(n) => n,
                    None => {
                        yield Err(DeepAgentError::Graph(format!("node '{current_node}' not found")));
                        return;
                    }
                };

                let output = match node.process(state.clone()).await {
                    Ok(o) => o,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut interrupt_val = None;
                let next_override = match output {
                    NodeOutput::State(new_state) => {
                        state = new_state;
                        None
                    }
                    NodeOutput::Command(cmd) => {
                        if let Some(update) = cmd.update {
                            state.merge(update);
                        }
                        if let Some(iv) = cmd.interrupt_value {
                            interrupt_val = Some(iv);
                            None
                        } else {
                            match cmd.goto {
                                Some(CommandGoto::One(target)) => Some(target),
                                Some(CommandGoto::Many(_)) => Some(END.to_string()),
                                None => None,
                            }
                        }
                    }
                };

                let event = GraphEvent {
                    node: current_node.clone(),
                    state: state.clone(),
                };
                yield Ok(event);

                if let Some(iv) = interrupt_val {
                    if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                        let next = self.find_next_node(&current_node, &state);
                        match make_checkpoint(&state, Some(next), &current_node) {
                            Ok(checkpoint) => {
                                if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                    yield Err(e);
                                    return;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    yield Err(DeepAgentError::Graph(format!(
                        "interrupted by node '{current_node}': {iv}"
                    )));
                    return;
                }

                let next = if let Some(target) = next_override {
                    target
                } else {
                    if self.interrupt_after.contains(&current_node) {
                        let next = self.find_next_node(&current_node, &state);
                        if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                            match make_checkpoint(&state, Some(next), &current_node) {
                                Ok(checkpoint) => {
                                    if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                        yield Err(e);
                                        return;
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                        yield Err(DeepAgentError::Graph(format!(
                            "interrupted after node '{current_node}'"
                        )));
                        return;
                    }
                    self.find_next_node(&current_node, &state)
                };

                if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                    match make_checkpoint(&state, Some(next.clone()), &current_node) {
                        Ok(checkpoint) => {
                            if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                yield Err(e);
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                current_node = next;
            }
        })
    }

    /// Stream graph execution with multiple stream modes, one event per
    /// requested mode per node execution.
    pub fn stream_modes(&self, state: S, modes: Vec<StreamMode>) -> MultiGraphStream<'_, S>
    where
        S: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        self.stream_modes_with_config(state, modes, None)
    }

    pub fn stream_modes_with_config(
        &self,
        state: S,
        modes: Vec<StreamMode>,
        config: Option<CheckpointConfig>,
    ) -> MultiGraphStream<'_, S>
    where
        S: serde::Serialize + serde::de::DeserializeOwned + Clone,
    {
        Box::pin(async_stream::stream! {
            let mut state = state;

            let mut resume_from: Option<String> = None;
            if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                match checkpointer.get(cfg).await {
                    Ok(Some(checkpoint)) => {
                        match serde_json::from_value(checkpoint.state) {
                            Ok(s) => {
                                state = s;
                                resume_from = checkpoint.next_node;
                            }
                            Err(e) => {
                                yield Err(DeepAgentError::Graph(format!(
                                    "failed to deserialize checkpoint state: {e}"
                                )));
                                return;
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let mut current_node = resume_from.unwrap_or_else(|| self.entry_point.clone());
            let mut max_iterations = 100;

            loop {
                if current_node == END {
                    break;
                }
                if max_iterations == 0 {
                    yield Err(DeepAgentError::Graph(
                        "max iterations (100) exceeded — possible infinite loop".to_string(),
                    ));
                    return;
                }
                max_iterations -= 1;

                if self.interrupt_before.contains(&current_node) {
                    if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                        match make_checkpoint(&state, Some(current_node.clone()), &current_node) {
                            Ok(checkpoint) => {
                                if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                    yield Err(e);
                                    return;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    yield Err(DeepAgentError::Graph(format!(
                        "interrupted before node '{current_node}'"
                    )));
                    return;
                }

                let state_before = state.clone();

                let node = match self.nodes.get(&current_node) {
                    Some(n) => n,
                    None => {
                        yield Err(DeepAgentError::Graph(format!("node '{current_node}' not found")));
                        return;
                    }
                };

                let output = match node.process(state.clone()).await {
                    Ok(o) => o,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let mut interrupt_val = None;
                let next_override = match output {
                    NodeOutput::State(new_state) => {
                        state = new_state;
                        None
                    }
                    NodeOutput::Command(cmd) => {
                        if let Some(update) = cmd.update {
                            state.merge(update);
                        }
                        if let Some(iv) = cmd.interrupt_value {
                            interrupt_val = Some(iv);
                            None
                        } else {
                            match cmd.goto {
                                Some(CommandGoto::One(target)) => Some(target),
                                Some(CommandGoto::Many(_)) => Some(END.to_string()),
                                None => None,
                            }
                        }
                    }
                };

                for mode in &modes {
                    let event = match mode {
                        StreamMode::Values | StreamMode::Debug | StreamMode::Custom => GraphEvent {
                            node: current_node.clone(),
                            state: state.clone(),
                        },
                        StreamMode::Updates => GraphEvent {
                            node: current_node.clone(),
                            state: state_before.clone(),
                        },
                        StreamMode::Messages => GraphEvent {
                            node: current_node.clone(),
                            state: state.clone(),
                        },
                    };
                    yield Ok(MultiGraphEvent { mode: *mode, event });
                }

                if let Some(iv) = interrupt_val {
                    if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                        let next = self.find_next_node(&current_node, &state);
                        match make_checkpoint(&state, Some(next), &current_node) {
                            Ok(checkpoint) => {
                                if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                    yield Err(e);
                                    return;
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    yield Err(DeepAgentError::Graph(format!(
                        "interrupted by node '{current_node}': {iv}"
                    )));
                    return;
                }

                let next = if let Some(target) = next_override {
                    target
                } else {
                    if self.interrupt_after.contains(&current_node) {
                        let next = self.find_next_node(&current_node, &state);
                        if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                            match make_checkpoint(&state, Some(next), &current_node) {
                                Ok(checkpoint) => {
                                    if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                        yield Err(e);
                                        return;
                                    }
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                        yield Err(DeepAgentError::Graph(format!(
                            "interrupted after node '{current_node}'"
                        )));
                        return;
                    }
                    self.find_next_node(&current_node, &state)
                };

                if let (Some(ref checkpointer), Some(ref cfg)) = (&self.checkpointer, &config) {
                    match make_checkpoint(&state, Some(next.clone()), &current_node) {
                        Ok(checkpoint) => {
                            if let Err(e) = checkpointer.put(cfg, &checkpoint).await {
                                yield Err(e);
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                current_node = next;
            }
        })
    }

    /// Merge an update into an interrupted thread's checkpointed state
    /// (human-in-the-loop resume path).
    pub async fn update_state(&self, config: &CheckpointConfig, update: S) -> Result<(), DeepAgentError>
    where
        S: serde::Serialize + serde::de::DeserializeOwned,
    {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| DeepAgentError::Graph("no checkpointer configured".to_string()))?;

        let checkpoint = checkpointer
            .get(config)
            .await?
            .ok_or_else(|| DeepAgentError::Graph("no checkpoint found".to_string()))?;

        let mut current_state: S = serde_json::from_value(checkpoint.state)
            .map_err(|e| DeepAgentError::Graph(format!("deserialize: {e}")))?;

        current_state.merge(update);

        let updated = Checkpoint::new(
            serde_json::to_value(&current_state).map_err(|e| DeepAgentError::Graph(format!("serialize: {e}")))?,
            checkpoint.next_node,
        )
        .with_metadata("source", serde_json::json!("update_state"));
        checkpointer.put(config, &updated).await?;

        Ok(())
    }

    /// Returns `None` if no checkpoint exists for the given thread.
    pub async fn get_state(&self, config: &CheckpointConfig) -> Result<Option<S>, DeepAgentError>
    where
        S: serde::de::DeserializeOwned,
    {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| DeepAgentError::Graph("no checkpointer configured".to_string()))?;

        match checkpointer.get(config).await? {
            Some(checkpoint) => {
                let state: S = serde_json::from_value(checkpoint.state).map_err(|e| {
                    DeepAgentError::Graph(format!("failed to deserialize checkpoint state: {e}"))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Full checkpoint history for a thread, oldest to newest.
    pub async fn get_state_history(
        &self,
        config: &CheckpointConfig,
    ) -> Result<Vec<(S, Option<String>)>, DeepAgentError>
    where
        S: serde::de::DeserializeOwned,
    {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| DeepAgentError::Graph("no checkpointer configured".to_string()))?;

        let checkpoints = checkpointer.list(config).await?;
        let mut history = Vec::with_capacity(checkpoints.len());

        for checkpoint in checkpoints {
            let state: S = serde_json::from_value(checkpoint.state).map_err(|e| {
                DeepAgentError::Graph(format!("failed to deserialize checkpoint state: {e}"))
            })?;
            history.push((state, checkpoint.next_node));
        }

        Ok(history)
    }

    async fn execute_with_cache(
        &self,
        node_name: &str,
        node: &dyn Node<S>,
        state: S,
    ) -> Result<NodeOutput<S>, DeepAgentError>
    where
        S: serde::Serialize,
    {
        let policy = match self.cache_policies.get(node_name) {
            Some(p) => p,
            None => return node.process(state).await,
        };

        let state_val = serde_json::to_value(&state)
            .map_err(|e| DeepAgentError::Graph(format!("cache: serialize state: {e}")))?;
        let key = hash_state(&state_val);

        {
            let cache = self.cache.read().await;
            if let Some(node_cache) = cache.get(node_name) {
                if let Some(entry) = node_cache.get(&key) {
                    if entry.is_valid() {
                        return Ok(entry.output.clone());
                    }
                }
            }
        }

        let output = node.process(state).await?;

        {
            let mut cache = self.cache.write().await;
            let node_cache = cache.entry(node_name.to_string()).or_default();
            node_cache.insert(
                key,
                CachedEntry {
                    output: output.clone(),
                    created: Instant::now(),
                    ttl: policy.ttl,
                },
            );
        }

        Ok(output)
    }

    pub fn is_deferred(&self, node_name: &str) -> bool {
        self.deferred.contains(node_name)
    }

    pub fn incoming_edge_count(&self, node_name: &str) -> usize {
        let fixed = self.edges.iter().filter(|e| e.target == node_name).count();
        let conditional = self
            .conditional_edges
            .iter()
            .filter_map(|ce| ce.path_map.as_ref())
            .flat_map(|pm| pm.values())
            .filter(|target| *target == node_name)
            .count();
        fixed + conditional
    }

    fn find_next_node(&self, current: &str, state: &S) -> String {
        for ce in &self.conditional_edges {
            if ce.source == current {
                return (ce.router)(state);
            }
        }
        for edge in &self.edges {
            if edge.source == current {
                return edge.target.clone();
            }
        }
        END.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::builder::StateGraph;
    use crate::command::{Command, GraphResult};

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    impl State for Counter {
        fn merge(&mut self, other: Self) {
            self.n += other.n;
        }
    }

    struct Increment;

    #[async_trait]
    impl Node<Counter> for Increment {
        async fn process(&self, mut state: Counter) -> Result<NodeOutput<Counter>, DeepAgentError> {
            state.n += 1;
            Ok(state.into())
        }
    }

    #[tokio::test]
    async fn invoke_runs_entry_to_end() {
        let graph = StateGraph::new()
            .add_node("a", Increment)
            .add_edge("a", END)
            .set_entry_point("a")
            .compile()
            .unwrap();
        let result = graph.invoke(Counter::default()).await.unwrap();
        match result {
            GraphResult::Complete(s) => assert_eq!(s.n, 1),
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn interrupt_before_pauses_without_running_node() {
        let graph = StateGraph::new()
            .add_node("a", Increment)
            .add_edge("a", END)
            .set_entry_point("a")
            .interrupt_before(vec!["a".to_string()])
            .compile()
            .unwrap();
        let result = graph.invoke(Counter::default()).await.unwrap();
        match result {
            GraphResult::Interrupted { state, .. } => assert_eq!(state.n, 0),
            _ => panic!("expected interrupt"),
        }
    }

    struct CommandNode {
        target: String,
    }

    #[async_trait]
    impl Node<Counter> for CommandNode {
        async fn process(&self, mut state: Counter) -> Result<NodeOutput<Counter>, DeepAgentError> {
            state.n += 1;
            Ok(Command::new().with_update(state).with_goto(self.target.clone()).into())
        }
    }

    #[tokio::test]
    async fn command_goto_overrides_fixed_edges() {
        let graph = StateGraph::new()
            .add_node("a", CommandNode { target: "c".to_string() })
            .add_node("b", Increment)
            .add_node("c", Increment)
            .add_edge("a", "b")
            .add_edge("b", END)
            .add_edge("c", END)
            .set_entry_point("a")
            .compile()
            .unwrap();
        let result = graph.invoke(Counter::default()).await.unwrap().into_state();
        // a's own +1 plus c's +1; b is skipped entirely.
        assert_eq!(result.n, 2);
    }

    struct CountingNode {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Node<Counter> for CountingNode {
        async fn process(&self, mut state: Counter) -> Result<NodeOutput<Counter>, DeepAgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            state.n += 1;
            Ok(state.into())
        }
    }

    #[tokio::test]
    async fn cache_policy_skips_reexecution_for_same_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut graph = StateGraph::new()
            .add_node("a", CountingNode { calls: calls.clone() })
            .add_edge("a", END)
            .set_entry_point("a")
            .compile()
            .unwrap();
        graph.cache_policies.insert("a".to_string(), CachePolicy::new(Duration::from_secs(60)));

        graph.invoke(Counter::default()).await.unwrap();
        graph.invoke(Counter::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn checkpointer_resumes_from_last_node() {
        use crate::checkpoint::{CheckpointConfig, MemorySaver};

        let graph = StateGraph::new()
            .add_node("a", Increment)
            .add_node("b", Increment)
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .interrupt_after(vec!["a".to_string()])
            .compile()
            .unwrap()
            .with_checkpointer(Arc::new(MemorySaver::new()));

        let config = CheckpointConfig::new("thread-1");
        let first = graph.invoke_with_config(Counter::default(), Some(config.clone())).await.unwrap();
        assert!(first.is_interrupted());

        let resumed = graph.invoke_with_config(Counter::default(), Some(config)).await.unwrap();
        match resumed {
            GraphResult::Complete(s) => assert_eq!(s.n, 2),
            _ => panic!("expected completion on resume"),
        }
    }
}
