use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError, Message, ToolCall};
use deepagent_graph::{MemorySaver, MessageState};
use deepagent_runtime::backend::StateBackend;
use deepagent_runtime::{create_deep_agent, ActionRequest, Decision, DecisionKind, DeepAgentOptions, HitlDecisionProvider, HitlToolConfig};

struct AlwaysReject;

#[async_trait]
impl HitlDecisionProvider for AlwaysReject {
    async fn decide(&self, _request: &ActionRequest, _config: &HitlToolConfig) -> Result<Decision, DeepAgentError> {
        Ok(Decision::Reject { reason: Some("not approved in this test".into()) })
    }
}

/// First turn requests two parallel calls — one guarded (`write_file`), one
/// not (`ls`) — exercising S6 (HITL rejection alongside an unguarded call in
/// the same batch). Second turn reports what both tool results said.
struct RequestsMixedBatch {
    call_count: AtomicUsize,
}

#[async_trait]
impl ChatModel for RequestsMixedBatch {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        let message = match n {
            0 => Message::ai_with_tool_calls(
                "",
                vec![
                    ToolCall { id: "tc_ls".into(), name: "ls".into(), arguments: serde_json::json!({"path": "/"}) },
                    ToolCall {
                        id: "tc_write".into(),
                        name: "write_file".into(),
                        arguments: serde_json::json!({"path": "/danger.txt", "content": "rm -rf"}),
                    },
                ],
            ),
            _ => {
                let tool_texts: Vec<String> =
                    request.messages.iter().filter(|m| m.is_tool()).map(|m| m.content().to_string()).collect();
                Message::ai(format!("results: {}", tool_texts.join(" | ")))
            }
        };
        Ok(ChatResponse { message, usage: None })
    }
}

#[tokio::test]
async fn rejected_write_does_not_touch_the_backend_while_unguarded_call_still_runs() {
    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(RequestsMixedBatch { call_count: AtomicUsize::new(0) });

    let mut interrupt_on = HashMap::new();
    interrupt_on.insert("write_file".to_string(), HitlToolConfig::default());

    let mut options = DeepAgentOptions::new(backend.clone());
    options.enable_subagents = false;
    options.enable_skills = false;
    options.enable_memory = false;
    options.checkpointer = Some(Arc::new(MemorySaver::new()));
    options.hitl_provider = Some(Arc::new(AlwaysReject));
    options.interrupt_on = interrupt_on;

    let agent = create_deep_agent(model, options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("list files then write one")])).await.unwrap();

    assert!(backend.read_raw("/danger.txt").await.is_err(), "rejected write must never reach the backend");

    let last = result.into_state().last_message().unwrap().content().to_string();
    assert!(last.contains("rejected"), "got: {last}");
    assert!(last.contains("[") || last.contains("path"), "the unguarded ls call should still have run: {last}");
}

#[tokio::test]
async fn interrupt_on_without_checkpointer_or_provider_is_rejected_at_construction() {
    let backend = Arc::new(StateBackend::new());
    struct Unused;
    #[async_trait]
    impl ChatModel for Unused {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            unreachable!("construction should fail before any model call")
        }
    }

    let mut interrupt_on = HashMap::new();
    interrupt_on.insert("write_file".to_string(), HitlToolConfig::default());
    let mut options = DeepAgentOptions::new(backend);
    options.interrupt_on = interrupt_on;

    let err = create_deep_agent(Arc::new(Unused), options).unwrap_err();
    assert!(matches!(err, DeepAgentError::Config(_)));
}

#[tokio::test]
async fn disallowed_decision_kind_surfaces_as_a_tool_error_not_a_crash() {
    struct RejectsEverything;
    #[async_trait]
    impl HitlDecisionProvider for RejectsEverything {
        async fn decide(&self, _request: &ActionRequest, _config: &HitlToolConfig) -> Result<Decision, DeepAgentError> {
            Ok(Decision::Reject { reason: None })
        }
    }

    struct OneShot;
    #[async_trait]
    impl ChatModel for OneShot {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            if request.messages.iter().any(Message::is_ai) {
                let tool_text = request.messages.iter().rev().find(|m| m.is_tool()).unwrap().content().to_string();
                return Ok(ChatResponse { message: Message::ai(format!("saw: {tool_text}")), usage: None });
            }
            Ok(ChatResponse {
                message: Message::ai_with_tool_calls(
                    "",
                    vec![ToolCall { id: "tc1".into(), name: "write_file".into(), arguments: serde_json::json!({"path": "/x", "content": "y"}) }],
                ),
                usage: None,
            })
        }
    }

    let backend = Arc::new(StateBackend::new());
    let mut interrupt_on = HashMap::new();
    interrupt_on.insert("write_file".to_string(), HitlToolConfig { allowed_decisions: vec![DecisionKind::Approve] });

    let mut options = DeepAgentOptions::new(backend);
    options.enable_subagents = false;
    options.enable_skills = false;
    options.enable_memory = false;
    options.checkpointer = Some(Arc::new(MemorySaver::new()));
    options.hitl_provider = Some(Arc::new(RejectsEverything));
    options.interrupt_on = interrupt_on;

    let agent = create_deep_agent(Arc::new(OneShot), options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("write it")])).await.unwrap();
    let last = result.into_state().last_message().unwrap().content().to_string();
    assert!(last.contains("does not allow"), "got: {last}");
}
