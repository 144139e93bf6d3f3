use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use deepagent_core::{DeepAgentError, Message, RuntimeAwareTool, Store, ToolRuntime};
use deepagent_middleware::{BaseToolCaller, MiddlewareChain, ToolCallRequest, ToolCaller};
use deepagent_tools::ToolRegistry;

use crate::command::NodeOutput;
use crate::node::Node;
use crate::state::MessageState;

/// Prebuilt node that executes every tool call on the last message in state.
///
/// Supports both plain `Tool` and `RuntimeAwareTool` instances — a
/// runtime-aware tool registered via [`with_runtime_tool`](Self::with_runtime_tool)
/// receives the current state, store, and tool call ID through a
/// [`ToolRuntime`]. A tool failure becomes the tool-result content rather
/// than aborting the node, matching `SerialToolExecutor`'s policy.
pub struct ToolNode {
    registry: Arc<ToolRegistry>,
    middleware: Option<Arc<MiddlewareChain>>,
    store: Option<Arc<dyn Store>>,
    runtime_tools: HashMap<String, Arc<dyn RuntimeAwareTool>>,
}

impl ToolNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            middleware: None,
            store: None,
            runtime_tools: HashMap::new(),
        }
    }

    pub fn with_middleware(registry: Arc<ToolRegistry>, middleware: Arc<MiddlewareChain>) -> Self {
        Self {
            registry,
            middleware: Some(middleware),
            store: None,
            runtime_tools: HashMap::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a runtime-aware tool. When a call matches it by name, the
    /// tool is invoked with a `ToolRuntime` carrying the current state, store
    /// and the call's ID, instead of going through the plain `Tool` path.
    pub fn with_runtime_tool(mut self, tool: Arc<dyn RuntimeAwareTool>) -> Self {
        self.runtime_tools.insert(tool.name().to_string(), tool);
        self
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Node<MessageState> for ToolNode {
    async fn process(&self, mut state: MessageState) -> Result<NodeOutput<MessageState>, DeepAgentError> {
        let last = state
            .last_message()
            .ok_or_else(|| DeepAgentError::Graph("no messages in state".to_string()))?;

        let tool_calls = last.tool_calls().to_vec();
        if tool_calls.is_empty() {
            return Ok(state.into());
        }

        let state_value = serde_json::to_value(&state).ok();

        for call in &tool_calls {
            let result: Value = if let Some(rt_tool) = self.runtime_tools.get(&call.name) {
                let runtime = ToolRuntime {
                    store: self.store.clone(),
                    stream_writer: None,
                    state: state_value.clone(),
                    tool_call_id: call.id.clone(),
                    config: None,
                };
                match rt_tool.call_with_runtime(call.arguments.clone(), runtime).await {
                    Ok(v) => v,
                    Err(e) => Value::String(format!("Error: {e}")),
                }
            } else if let Some(ref chain) = self.middleware {
                let request = ToolCallRequest { call: call.clone() };
                let base = BaseToolCaller::new(self.registry.tools());
                match chain.call_tool(request, &base).await {
                    Ok(v) => v,
                    Err(e) => Value::String(format!("Error: {e}")),
                }
            } else {
                match self.registry.get(&call.name) {
                    Some(tool) => match tool.call(call.arguments.clone()).await {
                        Ok(v) => v,
                        Err(e) => Value::String(format!("Error: {e}")),
                    },
                    None => Value::String(format!("Error: {}", DeepAgentError::ToolNotFound(call.name.clone()))),
                }
            };
            state.messages.push(Message::tool(value_to_text(&result), call.id.clone()));
        }

        Ok(state.into())
    }
}

/// Standard routing helper for `add_conditional_edges`: "tools" if the last
/// message carries pending tool calls, else `END`.
pub fn tools_condition(state: &MessageState) -> String {
    if let Some(last) = state.last_message() {
        if !last.tool_calls().is_empty() {
            return "tools".to_string();
        }
    }
    crate::END.to_string()
}
