//! Middleware chain for wrapping model and tool calls with cross-cutting
//! behavior (retries, fallback, human approval) independent of the graph
//! engine. `deepagent-runtime` layers its own graph-aware middleware
//! (filesystem eviction, summarization, subagent scheduling, HITL interrupts)
//! on top of the same [`AgentMiddleware`] seams.

use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError, ToolCall, ToolChoice, ToolDefinition};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A model call in flight. Middleware may rewrite `messages` or
/// `system_prompt` in `before_model`/`wrap_model_call` before it reaches the
/// underlying `ChatModel`.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<deepagent_core::Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<ToolChoice>,
    pub system_prompt: Option<String>,
}

impl ModelRequest {
    pub fn to_chat_request(&self) -> ChatRequest {
        let mut messages = self.messages.clone();
        if let Some(prompt) = &self.system_prompt {
            messages.insert(0, deepagent_core::Message::system(prompt.clone()));
        }
        let mut req = ChatRequest::new(messages).with_tools(self.tools.clone());
        if let Some(choice) = &self.tool_choice {
            req = req.with_tool_choice(choice.clone());
        }
        req
    }
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub message: deepagent_core::Message,
    pub usage: Option<deepagent_core::TokenUsage>,
}

/// A single tool call awaiting execution.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call: ToolCall,
}

// ---------------------------------------------------------------------------
// Caller seams
// ---------------------------------------------------------------------------

/// The next step in the model-call chain: either the underlying model or the
/// next middleware's `wrap_model_call`.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError>;
}

/// The next step in the tool-call chain: either the actual tool invocation or
/// the next middleware's `wrap_tool_call`.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call(&self, request: ToolCallRequest) -> Result<Value, DeepAgentError>;
}

/// Terminal `ModelCaller` that invokes a real `ChatModel`.
pub struct BaseChatModelCaller {
    model: Arc<dyn ChatModel>,
}

impl BaseChatModelCaller {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ModelCaller for BaseChatModelCaller {
    async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError> {
        let response = self.model.chat(request.to_chat_request()).await?;
        Ok(ModelResponse {
            message: response.message,
            usage: response.usage,
        })
    }
}

/// Terminal `ToolCaller` that invokes a real `Tool` by name from a registry.
pub struct BaseToolCaller {
    tools: Vec<Arc<dyn deepagent_core::Tool>>,
}

impl BaseToolCaller {
    pub fn new(tools: Vec<Arc<dyn deepagent_core::Tool>>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl ToolCaller for BaseToolCaller {
    async fn call(&self, request: ToolCallRequest) -> Result<Value, DeepAgentError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == request.call.name)
            .ok_or_else(|| DeepAgentError::ToolNotFound(request.call.name.clone()))?;
        tool.call(request.call.arguments.clone()).await
    }
}

// ---------------------------------------------------------------------------
// AgentMiddleware
// ---------------------------------------------------------------------------

/// A single middleware step in the agent's model/tool call pipeline.
///
/// All hooks default to a no-op / passthrough so implementations only
/// override what they need. `before_model`/`after_model` run unconditionally
/// around every model call (in middleware-stack order); `wrap_model_call`/
/// `wrap_tool_call` form an onion around the call and may intercept it
/// entirely (retry, fallback, approval, caching).
#[async_trait]
pub trait AgentMiddleware: Send + Sync {
    /// Runs once, the first time the agent node executes for a run (e.g.
    /// skill/memory injection that only needs to happen at the start of a
    /// conversation, not before every model call).
    async fn before_agent(&self, _messages: &mut Vec<deepagent_core::Message>) -> Result<(), DeepAgentError> {
        Ok(())
    }

    /// Runs once the agent has produced a final answer (no pending tool
    /// calls) — used for end-of-run sweeps such as cancelling orphaned
    /// sub-agent tasks.
    async fn after_agent(&self, _messages: &mut Vec<deepagent_core::Message>) -> Result<(), DeepAgentError> {
        Ok(())
    }

    /// Mutate the outgoing model request, e.g. to inject a system prompt
    /// section or prune messages. Runs before `wrap_model_call`.
    async fn before_model(&self, _request: &mut ModelRequest) -> Result<(), DeepAgentError> {
        Ok(())
    }

    /// Inspect or mutate the model's response after it returns.
    async fn after_model(&self, _response: &mut ModelResponse) -> Result<(), DeepAgentError> {
        Ok(())
    }

    /// Wrap the model call itself. Default passes through to `next`.
    async fn wrap_model_call(
        &self,
        request: ModelRequest,
        next: &dyn ModelCaller,
    ) -> Result<ModelResponse, DeepAgentError> {
        next.call(request).await
    }

    /// Wrap a single tool call. Default passes through to `next`.
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: &dyn ToolCaller,
    ) -> Result<Value, DeepAgentError> {
        next.call(request).await
    }
}

// ---------------------------------------------------------------------------
// MiddlewareChain
// ---------------------------------------------------------------------------

/// Composes an ordered list of middleware into a single `ModelCaller` /
/// `ToolCaller`. `before_model`/`after_model` run in stack order around the
/// wrapped call; `wrap_model_call`/`wrap_tool_call` nest so the first
/// middleware in the list is outermost.
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn AgentMiddleware>>,
}

impl MiddlewareChain {
    pub fn new(middlewares: Vec<Arc<dyn AgentMiddleware>>) -> Self {
        Self { middlewares }
    }

    pub async fn run_before_agent(&self, messages: &mut Vec<deepagent_core::Message>) -> Result<(), DeepAgentError> {
        for mw in &self.middlewares {
            mw.before_agent(messages).await?;
        }
        Ok(())
    }

    pub async fn run_after_agent(&self, messages: &mut Vec<deepagent_core::Message>) -> Result<(), DeepAgentError> {
        for mw in &self.middlewares {
            mw.after_agent(messages).await?;
        }
        Ok(())
    }

    pub async fn call_model(
        &self,
        mut request: ModelRequest,
        base: &dyn ModelCaller,
    ) -> Result<ModelResponse, DeepAgentError> {
        for mw in &self.middlewares {
            mw.before_model(&mut request).await?;
        }

        let mut response = self.call_model_wrapped(0, request, base).await?;

        for mw in &self.middlewares {
            mw.after_model(&mut response).await?;
        }

        Ok(response)
    }

    fn call_model_wrapped<'a>(
        &'a self,
        index: usize,
        request: ModelRequest,
        base: &'a dyn ModelCaller,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ModelResponse, DeepAgentError>> + Send + 'a>,
    > {
        Box::pin(async move {
            if index >= self.middlewares.len() {
                return base.call(request).await;
            }
            struct Continuation<'a> {
                chain: &'a MiddlewareChain,
                index: usize,
                base: &'a dyn ModelCaller,
            }
            #[async_trait]
            impl<'a> ModelCaller for Continuation<'a> {
                async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError> {
                    self.chain
                        .call_model_wrapped(self.index + 1, request, self.base)
                        .await
                }
            }
            let next = Continuation {
                chain: self,
                index: index + 1,
                base,
            };
            self.middlewares[index].wrap_model_call(request, &next).await
        })
    }

    pub async fn call_tool(
        &self,
        request: ToolCallRequest,
        base: &dyn ToolCaller,
    ) -> Result<Value, DeepAgentError> {
        self.call_tool_wrapped(0, request, base).await
    }

    fn call_tool_wrapped<'a>(
        &'a self,
        index: usize,
        request: ToolCallRequest,
        base: &'a dyn ToolCaller,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, DeepAgentError>> + Send + 'a>>
    {
        Box::pin(async move {
            if index >= self.middlewares.len() {
                return base.call(request).await;
            }
            struct Continuation<'a> {
                chain: &'a MiddlewareChain,
                index: usize,
                base: &'a dyn ToolCaller,
            }
            #[async_trait]
            impl<'a> ToolCaller for Continuation<'a> {
                async fn call(&self, request: ToolCallRequest) -> Result<Value, DeepAgentError> {
                    self.chain
                        .call_tool_wrapped(self.index + 1, request, self.base)
                        .await
                }
            }
            let next = Continuation {
                chain: self,
                index: index + 1,
                base,
            };
            self.middlewares[index].wrap_tool_call(request, &next).await
        })
    }
}

// ---------------------------------------------------------------------------
// HumanInTheLoopMiddleware — simple per-call approval gate
// ---------------------------------------------------------------------------

/// Callback asked whether a tool call should proceed.
#[async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn approve(&self, tool_name: &str, arguments: &Value) -> Result<bool, DeepAgentError>;
}

/// Gates tool calls behind an `ApprovalCallback`. Unlike the structured
/// interrupt/resume protocol in `deepagent-runtime`'s HITL middleware (which
/// pauses the graph and waits for an external decision), this version
/// resolves synchronously: a rejection is turned into a tool-result message
/// fed straight back to the model rather than suspending execution.
pub struct HumanInTheLoopMiddleware {
    callback: Arc<dyn ApprovalCallback>,
    guarded_tools: Option<Vec<String>>,
}

impl HumanInTheLoopMiddleware {
    /// Guards every tool call.
    pub fn new(callback: Arc<dyn ApprovalCallback>) -> Self {
        Self {
            callback,
            guarded_tools: None,
        }
    }

    /// Guards only the named tools; all others pass through without approval.
    pub fn for_tools(callback: Arc<dyn ApprovalCallback>, tools: Vec<String>) -> Self {
        Self {
            callback,
            guarded_tools: Some(tools),
        }
    }

    fn is_guarded(&self, name: &str) -> bool {
        match &self.guarded_tools {
            Some(list) => list.iter().any(|t| t == name),
            None => true,
        }
    }
}

#[async_trait]
impl AgentMiddleware for HumanInTheLoopMiddleware {
    async fn wrap_tool_call(
        &self,
        request: ToolCallRequest,
        next: &dyn ToolCaller,
    ) -> Result<Value, DeepAgentError> {
        if !self.is_guarded(&request.call.name) {
            return next.call(request).await;
        }

        let approved = self
            .callback
            .approve(&request.call.name, &request.call.arguments)
            .await?;

        if approved {
            next.call(request).await
        } else {
            Ok(Value::String(format!(
                "Tool call '{}' was rejected by the human reviewer.",
                request.call.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepagent_core::Message;
    use serde_json::json;

    struct AlwaysApprove;
    #[async_trait]
    impl ApprovalCallback for AlwaysApprove {
        async fn approve(&self, _name: &str, _args: &Value) -> Result<bool, DeepAgentError> {
            Ok(true)
        }
    }

    struct AlwaysReject;
    #[async_trait]
    impl ApprovalCallback for AlwaysReject {
        async fn approve(&self, _name: &str, _args: &Value) -> Result<bool, DeepAgentError> {
            Ok(false)
        }
    }

    struct MockToolCaller;
    #[async_trait]
    impl ToolCaller for MockToolCaller {
        async fn call(&self, _request: ToolCallRequest) -> Result<Value, DeepAgentError> {
            Ok(json!("executed"))
        }
    }

    fn make_request(name: &str) -> ToolCallRequest {
        ToolCallRequest {
            call: ToolCall {
                id: "tc-1".into(),
                name: name.into(),
                arguments: json!({}),
            },
        }
    }

    #[tokio::test]
    async fn approved_call_passes_through() {
        let mw = HumanInTheLoopMiddleware::new(Arc::new(AlwaysApprove));
        let result = mw
            .wrap_tool_call(make_request("search"), &MockToolCaller)
            .await
            .unwrap();
        assert_eq!(result, json!("executed"));
    }

    #[tokio::test]
    async fn rejected_call_returns_rejection_message() {
        let mw = HumanInTheLoopMiddleware::new(Arc::new(AlwaysReject));
        let result = mw
            .wrap_tool_call(make_request("delete_all"), &MockToolCaller)
            .await
            .unwrap();
        let msg = result.as_str().unwrap();
        assert!(msg.contains("rejected"));
        assert!(msg.contains("delete_all"));
    }

    #[tokio::test]
    async fn for_tools_allows_unlisted_tools() {
        let mw = HumanInTheLoopMiddleware::for_tools(Arc::new(AlwaysReject), vec!["dangerous".into()]);
        let result = mw
            .wrap_tool_call(make_request("safe_tool"), &MockToolCaller)
            .await
            .unwrap();
        assert_eq!(result, json!("executed"));
    }

    #[tokio::test]
    async fn chain_runs_before_model_in_stack_order() {
        struct Tag(&'static str);
        #[async_trait]
        impl AgentMiddleware for Tag {
            async fn before_model(&self, request: &mut ModelRequest) -> Result<(), DeepAgentError> {
                request.messages.push(Message::system(self.0));
                Ok(())
            }
        }
        struct Echo;
        #[async_trait]
        impl ModelCaller for Echo {
            async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError> {
                Ok(ModelResponse {
                    message: Message::ai(format!("{}", request.messages.len())),
                    usage: None,
                })
            }
        }
        let chain = MiddlewareChain::new(vec![Arc::new(Tag("a")), Arc::new(Tag("b"))]);
        let req = ModelRequest {
            messages: vec![],
            tools: vec![],
            tool_choice: None,
            system_prompt: None,
        };
        let resp = chain.call_model(req, &Echo).await.unwrap();
        assert_eq!(resp.message.content(), "2");
    }
}
