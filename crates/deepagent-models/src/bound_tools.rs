use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, ChatStream, DeepAgentError, ToolDefinition};

/// Wraps a `ChatModel` so a fixed set of tool definitions is always present
/// on outgoing requests, merging by name rather than duplicating when the
/// caller already attached overlapping tools.
pub struct BoundToolsChatModel {
    inner: Arc<dyn ChatModel>,
    tools: Vec<ToolDefinition>,
}

impl BoundToolsChatModel {
    pub fn new(inner: Arc<dyn ChatModel>, tools: Vec<ToolDefinition>) -> Self {
        Self { inner, tools }
    }

    fn merge_tools(&self, request: &ChatRequest) -> Vec<ToolDefinition> {
        let mut merged = request.tools.clone();
        for tool in &self.tools {
            if !merged.iter().any(|t| t.name == tool.name) {
                merged.push(tool.clone());
            }
        }
        merged
    }
}

#[async_trait]
impl ChatModel for BoundToolsChatModel {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let tools = self.merge_tools(&request);
        self.inner.chat(request.with_tools(tools)).await
    }

    fn profile(&self) -> Option<deepagent_core::ModelProfile> {
        self.inner.profile()
    }

    fn stream_chat(&self, request: ChatRequest) -> ChatStream<'_> {
        let tools = self.merge_tools(&request);
        self.inner.stream_chat(request.with_tools(tools))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedChatModel;
    use deepagent_core::Message;
    use futures::StreamExt;
    use serde_json::json;

    fn make_tool_def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    #[tokio::test]
    async fn injects_tools_when_request_has_none() {
        let inner: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel::new(vec![ChatResponse {
            message: Message::ai("ok"),
            usage: None,
        }]));
        let bound = BoundToolsChatModel::new(inner, vec![make_tool_def("search"), make_tool_def("calc")]);
        let request = ChatRequest::new(vec![Message::human("hi")]);
        let resp = bound.chat(request).await.unwrap();
        assert_eq!(resp.message.content(), "ok");
    }

    #[tokio::test]
    async fn merges_without_duplicating_by_name() {
        let inner: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel::new(vec![ChatResponse {
            message: Message::ai("merged"),
            usage: None,
        }]));
        let bound = BoundToolsChatModel::new(inner, vec![make_tool_def("search")]);
        let request = ChatRequest::new(vec![Message::human("hi")]).with_tools(vec![make_tool_def("search")]);
        let merged = bound.merge_tools(&request);
        assert_eq!(merged.len(), 1);
    }

    #[tokio::test]
    async fn streaming_delegates_to_inner() {
        let inner: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel::new(vec![ChatResponse {
            message: Message::ai("streamed"),
            usage: None,
        }]));
        let bound = BoundToolsChatModel::new(inner, vec![make_tool_def("tool1")]);
        let mut stream = bound.stream_chat(ChatRequest::new(vec![Message::human("hi")]));
        let chunk = stream.next().await.expect("should yield").unwrap();
        assert_eq!(chunk.content(), "streamed");
        assert!(stream.next().await.is_none());
    }
}
