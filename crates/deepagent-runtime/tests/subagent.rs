use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError, Message, ToolCall};
use deepagent_graph::MessageState;
use deepagent_runtime::backend::StateBackend;
use deepagent_runtime::{create_deep_agent, DeepAgentOptions, SubAgentDef};

/// First call dispatches a `task`, second call (whether parent or child)
/// gives a final answer.
struct DispatchesOneTask {
    call_count: AtomicUsize,
}

#[async_trait]
impl ChatModel for DispatchesOneTask {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        let message = match n {
            0 => Message::ai_with_tool_calls(
                "Delegating.",
                vec![ToolCall {
                    id: "tc_task".to_string(),
                    name: "task".to_string(),
                    arguments: serde_json::json!({"description": "investigate the thing"}),
                }],
            ),
            _ => Message::ai("All done, the sub-agent reported success."),
        };
        Ok(ChatResponse { message, usage: None })
    }
}

#[tokio::test]
async fn task_tool_round_trips_through_the_full_kernel() {
    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(DispatchesOneTask { call_count: AtomicUsize::new(0) });
    let mut options = DeepAgentOptions::new(backend);
    options.enable_skills = false;
    options.enable_memory = false;

    let agent = create_deep_agent(model, options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("go investigate")])).await.unwrap();
    let last = result.into_state().last_message().unwrap().content().to_string();
    assert!(last.contains("done") || last.contains("success"), "got: {last}");
}

/// `ToolNode` turns a tool's `Err` into a `"Error: ..."` tool-result message
/// rather than aborting the run (see DESIGN.md), so an unknown subagent type
/// surfaces as a message the model sees on its next turn, not a top-level
/// `Err` from `invoke`. This model dispatches the bad task once, then reports
/// back whatever it saw in the tool result.
struct DispatchesThenReports {
    task_args: serde_json::Value,
}

#[async_trait]
impl ChatModel for DispatchesThenReports {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let already_dispatched = request.messages.iter().any(Message::is_ai);
        let message = if already_dispatched {
            let tool_result = request.messages.iter().rev().find(|m| m.is_tool()).map(|m| m.content().to_string()).unwrap_or_default();
            Message::ai(format!("tool said: {tool_result}"))
        } else {
            Message::ai_with_tool_calls(
                "Delegating.",
                vec![ToolCall { id: "tc1".into(), name: "task".into(), arguments: self.task_args.clone() }],
            )
        };
        Ok(ChatResponse { message, usage: None })
    }
}

#[tokio::test]
async fn custom_subagent_type_is_rejected_when_unregistered() {
    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(DispatchesThenReports { task_args: serde_json::json!({"description": "x", "subagent_type": "reviewer"}) });
    let mut options = DeepAgentOptions::new(backend);
    options.enable_skills = false;
    options.enable_memory = false;
    // No custom subagents registered: "reviewer" does not exist.

    let agent = create_deep_agent(model, options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("go")])).await.unwrap();
    let last = result.into_state().last_message().unwrap().content().to_string();
    assert!(last.contains("unknown subagent_type"), "got: {last}");
}

#[tokio::test]
async fn zero_max_depth_blocks_every_task_dispatch() {
    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(DispatchesThenReports { task_args: serde_json::json!({"description": "x"}) });
    let mut options = DeepAgentOptions::new(backend);
    options.enable_skills = false;
    options.enable_memory = false;
    options.max_subagent_depth = 0;
    options.subagents = vec![SubAgentDef::new("reviewer", "reviews things")];

    let agent = create_deep_agent(model, options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("go")])).await.unwrap();
    let last = result.into_state().last_message().unwrap().content().to_string();
    assert!(last.contains("max subagent depth"), "got: {last}");
}
