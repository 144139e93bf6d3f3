//! Tool registry and call executors shared across the agent kernel and the
//! sub-agent scheduler (each sub-agent type gets its own registry built from
//! a different tool subset).

use std::collections::HashMap;
use std::sync::Arc;

use deepagent_core::{DeepAgentError, Message, Tool, ToolCall, ToolDefinition};

/// Name-indexed collection of tools available to a single agent invocation.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.as_tool_definition()).collect()
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.values().cloned().collect()
    }
}

/// Executes a batch of tool calls one at a time, in the order the model
/// emitted them, and turns each result (or error) into a `Message::Tool`.
/// Per-item tool failures become the tool-result content rather than
/// aborting the batch, matching the "tool errors are results, not fatal"
/// error-handling design.
pub struct SerialToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl SerialToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute_one(call).await);
        }
        results
    }

    async fn execute_one(&self, call: &ToolCall) -> Message {
        match self.registry.get(&call.name) {
            Some(tool) => match tool.call(call.arguments.clone()).await {
                Ok(value) => Message::tool(value_to_text(&value), call.id.clone()),
                Err(e) => Message::tool(format!("Error: {e}"), call.id.clone()),
            },
            None => Message::tool(
                format!("Error: {}", DeepAgentError::ToolNotFound(call.name.clone())),
                call.id.clone(),
            ),
        }
    }
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
