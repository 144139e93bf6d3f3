use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepagent_core::{estimate_tokens, DeepAgentError, Message, Tool, ToolDefinition};
use deepagent_middleware::{AgentMiddleware, ToolCallRequest, ToolCaller};
use serde_json::{json, Value};

use crate::backend::Backend;

/// Default token threshold above which a tool result is evicted to the
/// backend and replaced with a short notice.
pub const DEFAULT_TOOL_TOKEN_LIMIT_BEFORE_EVICT: usize = 4_000;
const EVICTION_PREVIEW_LINES: usize = 20;

/// Contributes the standard file tools (`ls`, `read_file`, `write_file`,
/// `edit_file`, `grep_file`, `glob_files`, and `execute` when the backend
/// supports it) and, via `wrap_tool_call`, evicts oversize tool results to
/// the backend rather than flooding the model's context.
pub struct FilesystemMiddleware {
    backend: Arc<dyn Backend>,
    tool_token_limit_before_evict: usize,
}

impl FilesystemMiddleware {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend, tool_token_limit_before_evict: DEFAULT_TOOL_TOKEN_LIMIT_BEFORE_EVICT }
    }

    pub fn with_eviction_threshold(mut self, tokens: usize) -> Self {
        self.tool_token_limit_before_evict = tokens;
        self
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(LsTool { backend: self.backend.clone() }),
            Arc::new(ReadFileTool { backend: self.backend.clone() }),
            Arc::new(WriteFileTool { backend: self.backend.clone() }),
            Arc::new(EditFileTool { backend: self.backend.clone() }),
            Arc::new(GrepFileTool { backend: self.backend.clone() }),
            Arc::new(GlobFilesTool { backend: self.backend.clone() }),
        ];
        if self.backend.supports_execution() {
            tools.push(Arc::new(ExecuteTool { backend: self.backend.clone() }));
        }
        tools
    }
}

#[async_trait]
impl AgentMiddleware for FilesystemMiddleware {
    async fn wrap_tool_call(&self, request: ToolCallRequest, next: &dyn ToolCaller) -> Result<Value, DeepAgentError> {
        let tool_call_id = request.call.id.clone();
        let result = next.call(request).await?;

        let as_text = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let tokens = estimate_tokens(&[Message::tool(as_text.clone(), tool_call_id.clone())]);
        if tokens < self.tool_token_limit_before_evict {
            return Ok(result);
        }

        let eviction_path = format!("/large_tool_results/{tool_call_id}");
        self.backend.write(&eviction_path, &as_text).await?;

        let preview: String = as_text.lines().take(EVICTION_PREVIEW_LINES).collect::<Vec<_>>().join("\n");
        let notice = json!({
            "notice": format!(
                "Tool result was too large ({tokens} estimated tokens) and was saved to '{eviction_path}'. \
                 Use read_file to inspect it. Preview of the first {EVICTION_PREVIEW_LINES} lines:"
            ),
            "path": eviction_path,
            "original_tokens": tokens,
            "preview": preview,
        });
        Ok(notice)
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

struct LsTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &'static str {
        "ls"
    }
    fn description(&self) -> &'static str {
        "List files and directories at the given path (non-recursive)."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"path": {"type": "string", "default": "/"}},
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let path = args.get("path").and_then(Value::as_str).unwrap_or("/");
        let entries = self.backend.ls_info(path).await?;
        Ok(json!(entries))
    }
}

struct ReadFileTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }
    fn description(&self) -> &'static str {
        "Read a file's contents with line numbers, optionally offset/limited."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "offset": {"type": "integer", "default": 0},
                "limit": {"type": "integer", "default": 500}
            },
            "required": ["path"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let path = args.get("path").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'path'".into()))?;
        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(500) as usize;
        let text = self.backend.read(path, offset, limit).await?;
        Ok(Value::String(text))
    }
}

struct WriteFileTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }
    fn description(&self) -> &'static str {
        "Create a new file with the given content. Fails if the file already exists."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
            "required": ["path", "content"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let path = args.get("path").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'path'".into()))?;
        let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
        self.backend.write(path, content).await?;
        Ok(json!({"path": path, "status": "written"}))
    }
}

struct EditFileTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }
    fn description(&self) -> &'static str {
        "Replace an exact substring in a file. Errors if not found, or found more than once without replace_all."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "old_string": {"type": "string"},
                "new_string": {"type": "string"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["path", "old_string", "new_string"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let path = args.get("path").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'path'".into()))?;
        let old = args.get("old_string").and_then(Value::as_str).unwrap_or_default();
        let new = args.get("new_string").and_then(Value::as_str).unwrap_or_default();
        let replace_all = args.get("replace_all").and_then(Value::as_bool).unwrap_or(false);
        let occurrences = self.backend.edit(path, old, new, replace_all).await?;
        Ok(json!({"path": path, "occurrences": occurrences}))
    }
}

struct GrepFileTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for GrepFileTool {
    fn name(&self) -> &'static str {
        "grep_file"
    }
    fn description(&self) -> &'static str {
        "Search for a literal substring across files under a path, optionally filtered by glob."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "path": {"type": "string"},
                "glob": {"type": "string"}
            },
            "required": ["pattern"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let pattern = args.get("pattern").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'pattern'".into()))?;
        let path = args.get("path").and_then(Value::as_str);
        let glob = args.get("glob").and_then(Value::as_str);
        let matches = self.backend.grep_raw(pattern, path, glob).await?;
        Ok(json!(matches))
    }
}

struct GlobFilesTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for GlobFilesTool {
    fn name(&self) -> &'static str {
        "glob_files"
    }
    fn description(&self) -> &'static str {
        "Find files matching a shell-style glob pattern (supports *, **, ?, [...])."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}, "path": {"type": "string"}},
            "required": ["pattern"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let pattern = args.get("pattern").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'pattern'".into()))?;
        let path = args.get("path").and_then(Value::as_str);
        let matches = self.backend.glob_info(pattern, path).await?;
        Ok(json!(matches))
    }
}

struct ExecuteTool {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl Tool for ExecuteTool {
    fn name(&self) -> &'static str {
        "execute"
    }
    fn description(&self) -> &'static str {
        "Run a shell command in the sandbox and return its output, exit code, and whether it was truncated."
    }
    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout_secs": {"type": "integer"}
            },
            "required": ["command"]
        }))
    }
    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }
    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let command = args.get("command").and_then(Value::as_str).ok_or_else(|| DeepAgentError::Validation("missing 'command'".into()))?;
        let timeout = args.get("timeout_secs").and_then(Value::as_u64).map(Duration::from_secs);
        let result = self.backend.execute(command, timeout).await?;
        Ok(json!(result))
    }
}
