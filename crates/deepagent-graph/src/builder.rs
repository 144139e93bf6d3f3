use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use deepagent_core::DeepAgentError;

use crate::compiled::CompiledGraph;
use crate::edge::{ConditionalEdge, Edge};
use crate::node::Node;
use crate::state::State;
use crate::{END, START};

/// Builder for constructing a state graph node by node before compiling it
/// into an executable [`CompiledGraph`].
pub struct StateGraph<S: State> {
    nodes: HashMap<String, Box<dyn Node<S>>>,
    edges: Vec<Edge>,
    conditional_edges: Vec<ConditionalEdge<S>>,
    entry_point: Option<String>,
    interrupt_before: HashSet<String>,
    interrupt_after: HashSet<String>,
    deferred: HashSet<String>,
}

impl<S: State> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: Vec::new(),
            entry_point: None,
            interrupt_before: HashSet::new(),
            interrupt_after: HashSet::new(),
            deferred: HashSet::new(),
        }
    }

    pub fn add_node(mut self, name: impl Into<String>, node: impl Node<S> + 'static) -> Self {
        self.nodes.insert(name.into(), Box::new(node));
        self
    }

    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    pub fn add_conditional_edges(
        mut self,
        source: impl Into<String>,
        router: impl Fn(&S) -> String + Send + Sync + 'static,
    ) -> Self {
        self.conditional_edges.push(ConditionalEdge::new(source, router));
        self
    }

    /// Same as `add_conditional_edges`, plus a label->target map used only
    /// for `incoming_edge_count` bookkeeping (not consulted for routing).
    pub fn add_conditional_edges_with_path_map(
        mut self,
        source: impl Into<String>,
        router: impl Fn(&S) -> String + Send + Sync + 'static,
        path_map: HashMap<String, String>,
    ) -> Self {
        self.conditional_edges
            .push(ConditionalEdge::new(source, router).with_path_map(path_map));
        self
    }

    pub fn set_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = Some(name.into());
        self
    }

    /// Pause before any of these nodes run, producing `GraphResult::Interrupted`.
    pub fn interrupt_before(mut self, nodes: Vec<String>) -> Self {
        self.interrupt_before.extend(nodes);
        self
    }

    /// Pause after any of these nodes run.
    pub fn interrupt_after(mut self, nodes: Vec<String>) -> Self {
        self.interrupt_after.extend(nodes);
        self
    }

    /// Mark nodes that wait for all their incoming edges before running.
    /// Bookkeeping only for now — the executor doesn't yet implement true
    /// barrier scheduling, matching `CommandGoto::Many`'s current limits.
    pub fn defer(mut self, nodes: Vec<String>) -> Self {
        self.deferred.extend(nodes);
        self
    }

    pub fn compile(self) -> Result<CompiledGraph<S>, DeepAgentError> {
        let entry = self
            .entry_point
            .ok_or_else(|| DeepAgentError::Graph("no entry point set".to_string()))?;

        if !self.nodes.contains_key(&entry) {
            return Err(DeepAgentError::Graph(format!("entry point node '{entry}' not found")));
        }

        for edge in &self.edges {
            if edge.source != START && !self.nodes.contains_key(&edge.source) {
                return Err(DeepAgentError::Graph(format!("edge source '{}' not found", edge.source)));
            }
            if edge.target != END && !self.nodes.contains_key(&edge.target) {
                return Err(DeepAgentError::Graph(format!("edge target '{}' not found", edge.target)));
            }
        }

        for ce in &self.conditional_edges {
            if ce.source != START && !self.nodes.contains_key(&ce.source) {
                return Err(DeepAgentError::Graph(format!(
                    "conditional edge source '{}' not found",
                    ce.source
                )));
            }
            if let Some(ref path_map) = ce.path_map {
                for (label, target) in path_map {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(DeepAgentError::Graph(format!(
                            "conditional edge path_map target '{target}' (label '{label}') not found"
                        )));
                    }
                }
            }
        }

        Ok(CompiledGraph {
            nodes: self.nodes,
            edges: self.edges,
            conditional_edges: self.conditional_edges,
            entry_point: entry,
            interrupt_before: self.interrupt_before,
            interrupt_after: self.interrupt_after,
            checkpointer: None,
            cache_policies: HashMap::new(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            deferred: self.deferred,
        })
    }
}

impl<S: State> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NodeOutput;
    use crate::state::MessageState;
    use async_trait::async_trait;
    use deepagent_core::Message;

    struct Append(&'static str);

    #[async_trait]
    impl Node<MessageState> for Append {
        async fn process(&self, mut state: MessageState) -> Result<NodeOutput<MessageState>, DeepAgentError> {
            state.messages.push(Message::ai(self.0));
            Ok(state.into())
        }
    }

    #[tokio::test]
    async fn compile_rejects_missing_entry_point() {
        let result: Result<CompiledGraph<MessageState>, _> =
            StateGraph::new().add_node("a", Append("a")).compile();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn compile_rejects_dangling_edge_target() {
        let result: Result<CompiledGraph<MessageState>, _> = StateGraph::new()
            .add_node("a", Append("a"))
            .add_edge("a", "missing")
            .set_entry_point("a")
            .compile();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn linear_graph_runs_entry_to_end() {
        let graph = StateGraph::new()
            .add_node("a", Append("a"))
            .add_node("b", Append("b"))
            .add_edge("a", "b")
            .add_edge("b", END)
            .set_entry_point("a")
            .compile()
            .unwrap();

        let result = graph.invoke(MessageState::new()).await.unwrap().into_state();
        assert_eq!(result.messages.len(), 2);
    }
}
