use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::collections::HashMap;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, DeepAgentError, Message, Store, Tool, ToolDefinition};
use deepagent_middleware::{AgentMiddleware, BaseChatModelCaller, MiddlewareChain, ModelRequest};
use deepagent_tools::ToolRegistry;
use serde_json::Value;

use crate::builder::StateGraph;
use crate::checkpoint::Checkpointer;
use crate::command::NodeOutput;
use crate::compiled::CompiledGraph;
use crate::node::Node;
use crate::state::MessageState;
use crate::tool_node::ToolNode;
use crate::END;

/// A hook called before each model invocation, letting callers edit state
/// (trim history, inject a reminder) outside the middleware pipeline.
pub type PreModelHook =
    Arc<dyn Fn(&mut MessageState) -> Pin<Box<dyn Future<Output = Result<(), DeepAgentError>> + Send + '_>> + Send + Sync>;

/// A hook called after each model invocation.
pub type PostModelHook =
    Arc<dyn Fn(&mut MessageState) -> Pin<Box<dyn Future<Output = Result<(), DeepAgentError>> + Send + '_>> + Send + Sync>;

/// Prebuilt node that calls a `ChatModel` through the middleware chain,
/// running `before_agent`/`after_agent` sweeps at the start/end of a turn.
struct ChatModelNode {
    model: Arc<dyn ChatModel>,
    tool_defs: Vec<ToolDefinition>,
    system_prompt: Option<String>,
    middleware: Arc<MiddlewareChain>,
    is_first_call: AtomicBool,
    pre_model_hook: Option<PreModelHook>,
    post_model_hook: Option<PostModelHook>,
    /// When set, a final answer (no tool calls) is re-called with structured
    /// output instructions matching this JSON schema.
    response_format: Option<Value>,
}

#[async_trait]
impl Node<MessageState> for ChatModelNode {
    async fn process(&self, mut state: MessageState) -> Result<NodeOutput<MessageState>, DeepAgentError> {
        if self.is_first_call.swap(false, Ordering::SeqCst) {
            self.middleware.run_before_agent(&mut state.messages).await?;
        }

        if let Some(ref hook) = self.pre_model_hook {
            hook(&mut state).await?;
        }

        let request = ModelRequest {
            messages: state.messages.clone(),
            tools: self.tool_defs.clone(),
            tool_choice: None,
            system_prompt: self.system_prompt.clone(),
        };

        let base_caller = BaseChatModelCaller::new(self.model.clone());
        let response = self.middleware.call_model(request, &base_caller).await?;

        state.messages.push(response.message.clone());

        if let Some(ref hook) = self.post_model_hook {
            hook(&mut state).await?;
        }

        if response.message.tool_calls().is_empty() {
            if let Some(ref schema) = self.response_format {
                let instruction = format!(
                    "You MUST respond with valid JSON matching this schema:\n{schema}\n\n\
                     Do not include any text outside the JSON object. Do not use markdown code blocks."
                );
                let mut structured_messages = vec![Message::system(instruction)];
                structured_messages.extend(state.messages.clone());

                let structured_response = self.model.chat(ChatRequest::new(structured_messages)).await?;
                state.messages.pop();
                state.messages.push(structured_response.message);
            }

            self.middleware.run_after_agent(&mut state.messages).await?;
        }

        Ok(state.into())
    }
}

/// Options for `create_react_agent_with_options`.
#[derive(Default)]
pub struct ReactAgentOptions {
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    pub interrupt_before: Vec<String>,
    pub interrupt_after: Vec<String>,
    pub system_prompt: Option<String>,
}

pub fn create_react_agent(
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
) -> Result<CompiledGraph<MessageState>, DeepAgentError> {
    create_react_agent_with_options(model, tools, ReactAgentOptions::default())
}

pub fn create_react_agent_with_options(
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    options: ReactAgentOptions,
) -> Result<CompiledGraph<MessageState>, DeepAgentError> {
    create_agent(
        model,
        tools,
        AgentOptions {
            checkpointer: options.checkpointer,
            interrupt_before: options.interrupt_before,
            interrupt_after: options.interrupt_after,
            system_prompt: options.system_prompt,
            ..Default::default()
        },
    )
}

/// Options for `create_agent`, the full middleware/store-aware builder that
/// the deep-agent kernel assembles on top of.
#[derive(Default)]
pub struct AgentOptions {
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    pub interrupt_before: Vec<String>,
    pub interrupt_after: Vec<String>,
    pub system_prompt: Option<String>,
    pub middleware: Vec<Arc<dyn AgentMiddleware>>,
    pub store: Option<Arc<dyn Store>>,
    pub name: Option<String>,
    pub pre_model_hook: Option<PreModelHook>,
    pub post_model_hook: Option<PostModelHook>,
    pub response_format: Option<Value>,
}

/// Assembles the standard two-node agent/tools loop: call the model, route
/// to "tools" when it emits tool calls, execute them, and loop back.
pub fn create_agent(
    model: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    options: AgentOptions,
) -> Result<CompiledGraph<MessageState>, DeepAgentError> {
    let tool_defs: Vec<ToolDefinition> = tools.iter().map(|t| t.as_tool_definition()).collect();
    let registry = Arc::new(ToolRegistry::from_tools(tools));

    let middleware_chain = Arc::new(MiddlewareChain::new(options.middleware));

    let agent_node = ChatModelNode {
        model,
        tool_defs,
        system_prompt: options.system_prompt,
        middleware: middleware_chain.clone(),
        is_first_call: AtomicBool::new(true),
        pre_model_hook: options.pre_model_hook,
        post_model_hook: options.post_model_hook,
        response_format: options.response_format,
    };

    let mut tool_node = ToolNode::with_middleware(registry, middleware_chain);
    if let Some(ref store) = options.store {
        tool_node = tool_node.with_store(store.clone());
    }

    let mut builder = StateGraph::new()
        .add_node("agent", agent_node)
        .add_node("tools", tool_node)
        .set_entry_point("agent")
        .add_conditional_edges_with_path_map(
            "agent",
            |state: &MessageState| {
                match state.last_message() {
                    // An AI turn with pending tool calls routes to "tools"; a
                    // clean AI turn ends the run. Anything else (e.g. a
                    // message appended by a middleware's `after_agent` sweep,
                    // such as a reconciled sub-agent result) means someone
                    // wants the model to see it — loop back to "agent" rather
                    // than ending on a non-final message.
                    Some(last) if last.is_ai() && !last.tool_calls().is_empty() => "tools".to_string(),
                    Some(last) if last.is_ai() => END.to_string(),
                    Some(_) => "agent".to_string(),
                    None => END.to_string(),
                }
            },
            HashMap::from([
                ("tools".to_string(), "tools".to_string()),
                ("agent".to_string(), "agent".to_string()),
                (END.to_string(), END.to_string()),
            ]),
        )
        .add_edge("tools", "agent");

    if !options.interrupt_before.is_empty() {
        builder = builder.interrupt_before(options.interrupt_before);
    }
    if !options.interrupt_after.is_empty() {
        builder = builder.interrupt_after(options.interrupt_after);
    }

    let mut graph = builder.compile()?;

    if let Some(checkpointer) = options.checkpointer {
        graph = graph.with_checkpointer(checkpointer);
    }

    Ok(graph)
}
