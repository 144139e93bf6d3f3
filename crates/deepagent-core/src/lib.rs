use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[cfg(feature = "schemars")]
pub use schemars;

// ---------------------------------------------------------------------------
// ContentBlock — multimodal message content
// ---------------------------------------------------------------------------

/// A block of content within a message, supporting multimodal inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    File {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Data {
        data: Value,
    },
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message. Tagged enum with System, Human, AI, and Tool variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        additional_kwargs: HashMap<String, Value>,
    },
    #[serde(rename = "human")]
    Human {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        additional_kwargs: HashMap<String, Value>,
    },
    #[serde(rename = "assistant")]
    AI {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        additional_kwargs: HashMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage_metadata: Option<TokenUsage>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        additional_kwargs: HashMap<String, Value>,
    },
    /// Signals removal of a message by ID. Used during history management.
    #[serde(rename = "remove")]
    Remove { id: String },
}

macro_rules! get_message_field {
    ($self:expr, $field:ident) => {
        match $self {
            Message::System { $field, .. } => $field,
            Message::Human { $field, .. } => $field,
            Message::AI { $field, .. } => $field,
            Message::Tool { $field, .. } => $field,
            Message::Remove { .. } => unreachable!("get_message_field called on Remove variant"),
        }
    };
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
            id: None,
            additional_kwargs: HashMap::new(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
            id: None,
            additional_kwargs: HashMap::new(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Message::AI {
            content: content.into(),
            tool_calls: vec![],
            id: None,
            additional_kwargs: HashMap::new(),
            usage_metadata: None,
        }
    }

    pub fn ai_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::AI {
            content: content.into(),
            tool_calls,
            id: None,
            additional_kwargs: HashMap::new(),
            usage_metadata: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            id: None,
            additional_kwargs: HashMap::new(),
        }
    }

    pub fn remove(id: impl Into<String>) -> Self {
        Message::Remove { id: id.into() }
    }

    pub fn with_id(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Message::Remove { .. } => {}
            other => *get_message_field!(other, id) = Some(value.into()),
        }
        self
    }

    pub fn content(&self) -> &str {
        match self {
            Message::Remove { .. } => "",
            other => get_message_field!(other, content),
        }
    }

    pub fn role(&self) -> &str {
        match self {
            Message::System { .. } => "system",
            Message::Human { .. } => "human",
            Message::AI { .. } => "assistant",
            Message::Tool { .. } => "tool",
            Message::Remove { .. } => "remove",
        }
    }

    pub fn is_ai(&self) -> bool {
        matches!(self, Message::AI { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Message::Remove { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::AI { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Remove { id } => Some(id),
            other => get_message_field!(other, id).as_deref(),
        }
    }

    pub fn usage_metadata(&self) -> Option<&TokenUsage> {
        match self {
            Message::AI { usage_metadata, .. } => usage_metadata.as_ref(),
            _ => None,
        }
    }

    /// Returns the target ID if this is a `Remove` message, else `None`.
    pub fn remove_id(&self) -> Option<&str> {
        match self {
            Message::Remove { id } => Some(id),
            _ => None,
        }
    }
}

/// Rough token estimate used by trigger policies that don't have a real tokenizer.
/// ~4 characters per token, matching the heuristic used elsewhere in the stack.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| m.content().len() / 4 + 1).sum()
}

// ---------------------------------------------------------------------------
// Tool-related types
// ---------------------------------------------------------------------------

/// A tool invocation requested by an AI model: an ID, function name, and JSON arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Schema for a tool: name, description, and JSON Schema for parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Controls how the model selects tools: Auto, Required, None, or a Specific named tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Specific(String),
}

// ---------------------------------------------------------------------------
// Chat request / response
// ---------------------------------------------------------------------------

/// A request to a chat model: messages plus optional tool definitions and tool choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tools: vec![],
            tool_choice: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }
}

/// A chat model response: the AI message plus optional token usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Lifecycle events emitted during agent execution, consumed by `CallbackHandler`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted { run_id: String, session_id: String },
    RunStep { run_id: String, step: usize },
    LlmCalled { run_id: String, message_count: usize },
    ToolCalled { run_id: String, tool_name: String },
    RunFinished { run_id: String, output: String },
    RunFailed { run_id: String, error: String },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for the deep agent runtime.
///
/// Three classes per the design: per-item result errors (`Tool`, `Backend`), control-flow
/// signals (`Interrupted`), and fatal errors (everything else) that abort the run.
#[derive(Debug, Error)]
pub enum DeepAgentError {
    #[error("model error: {0}")]
    Model(String),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("parsing error: {0}")]
    Parsing(String),
    #[error("callback error: {0}")]
    Callback(String),
    #[error("max steps exceeded: {max_steps}")]
    MaxStepsExceeded { max_steps: usize },
    #[error("graph error: {0}")]
    Graph(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("config error: {0}")]
    Config(String),
    /// Context window overflow reported by the model provider after the summarization
    /// middleware already tried to shrink the request. Distinct from `Model` so the
    /// overflow-fallback retry path can recognize it without string matching alone.
    #[error("context window overflow: {0}")]
    ContextOverflow(String),
    /// Raised by a node to signal a graph interrupt (human-in-the-loop pause).
    /// Not a fatal error: `CompiledGraph::invoke`/`stream` catch this and return
    /// `GraphResult::Interrupted` instead of propagating it to the caller.
    #[error("interrupted: {0}")]
    Interrupted(String),
}

// ---------------------------------------------------------------------------
// Core traits
// ---------------------------------------------------------------------------

pub type ChatStream<'a> =
    Pin<Box<dyn Stream<Item = Result<Message, DeepAgentError>> + Send + 'a>>;

/// Describes a model's capabilities and limits, consulted by the summarization
/// middleware to choose profile-aware vs. profile-blind defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    pub max_input_tokens: Option<usize>,
}

/// The core trait for language model providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError>;

    fn profile(&self) -> Option<ModelProfile> {
        None
    }

    fn stream_chat(&self, request: ChatRequest) -> ChatStream<'_> {
        Box::pin(async_stream::stream! {
            match self.chat(request).await {
                Ok(response) => yield Ok(response.message),
                Err(e) => yield Err(e),
            }
        })
    }
}

/// An executable tool callable by an AI model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, args: Value) -> Result<Value, DeepAgentError>;

    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self
                .parameters()
                .unwrap_or(serde_json::json!({"type": "object", "properties": {}})),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore / CallbackHandler
// ---------------------------------------------------------------------------

/// Persistent storage for conversation message history, keyed by session ID.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), DeepAgentError>;
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, DeepAgentError>;
    async fn clear(&self, session_id: &str) -> Result<(), DeepAgentError>;
}

/// Handler for lifecycle events during agent execution.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn on_event(&self, event: RunEvent) -> Result<(), DeepAgentError>;
}

// ---------------------------------------------------------------------------
// RunnableConfig
// ---------------------------------------------------------------------------

/// Runtime configuration threaded through graph invocations: thread/session
/// identification, tags, metadata, and recursion limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnableConfig {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub recursion_limit: Option<usize>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl RunnableConfig {
    pub fn with_thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// A stored item in the key-value store (used by Skills/Memory and cross-session state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// Returns the current time as an RFC 3339 / ISO-8601 timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Persistent key-value store trait for cross-invocation state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, namespace: &[&str], key: &str) -> Result<Option<Item>, DeepAgentError>;

    async fn search(
        &self,
        namespace: &[&str],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Item>, DeepAgentError>;

    async fn put(&self, namespace: &[&str], key: &str, value: Value) -> Result<(), DeepAgentError>;

    async fn delete(&self, namespace: &[&str], key: &str) -> Result<(), DeepAgentError>;

    async fn list_namespaces(&self, prefix: &[&str]) -> Result<Vec<Vec<String>>, DeepAgentError>;
}

// ---------------------------------------------------------------------------
// Runtime types
// ---------------------------------------------------------------------------

pub type StreamWriter = Arc<dyn Fn(Value) + Send + Sync>;

/// Graph execution runtime context passed to nodes and middleware.
#[derive(Clone)]
pub struct Runtime {
    pub store: Option<Arc<dyn Store>>,
    pub stream_writer: Option<StreamWriter>,
}

/// Tool execution runtime context: state snapshot, tool call ID, store, config.
#[derive(Clone)]
pub struct ToolRuntime {
    pub store: Option<Arc<dyn Store>>,
    pub stream_writer: Option<StreamWriter>,
    pub state: Option<Value>,
    pub tool_call_id: String,
    pub config: Option<RunnableConfig>,
}

impl Default for ToolRuntime {
    fn default() -> Self {
        Self {
            store: None,
            stream_writer: None,
            state: None,
            tool_call_id: String::new(),
            config: None,
        }
    }
}

/// A tool that receives runtime context (current state, store, tool call ID).
/// Implement this for tools whose behavior depends on graph state, e.g. filesystem
/// tools that need the checkpointed `files` map or the `task` tool that needs depth.
#[async_trait]
pub trait RuntimeAwareTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call_with_runtime(
        &self,
        args: Value,
        runtime: ToolRuntime,
    ) -> Result<Value, DeepAgentError>;

    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self
                .parameters()
                .unwrap_or(serde_json::json!({"type": "object", "properties": {}})),
        }
    }
}

/// Adapts a `RuntimeAwareTool` into a plain `Tool` by stashing the latest runtime
/// in an interior `RwLock`, set by the graph executor before each tool call.
pub struct RuntimeAwareToolAdapter {
    inner: Arc<dyn RuntimeAwareTool>,
    runtime: Arc<tokio::sync::RwLock<Option<ToolRuntime>>>,
}

impl RuntimeAwareToolAdapter {
    pub fn new(tool: Arc<dyn RuntimeAwareTool>) -> Self {
        Self {
            inner: tool,
            runtime: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    pub async fn set_runtime(&self, runtime: ToolRuntime) {
        *self.runtime.write().await = Some(runtime);
    }
}

#[async_trait]
impl Tool for RuntimeAwareToolAdapter {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn description(&self) -> &'static str {
        self.inner.description()
    }

    fn parameters(&self) -> Option<Value> {
        self.inner.parameters()
    }

    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let runtime = self.runtime.read().await.clone().unwrap_or_default();
        self.inner.call_with_runtime(args, runtime).await
    }
}
