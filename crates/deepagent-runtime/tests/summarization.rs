use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError, Message, ModelProfile};
use deepagent_graph::MessageState;
use deepagent_middleware::AgentMiddleware;
use deepagent_runtime::backend::{Backend, StateBackend};
use deepagent_runtime::middleware::summarization::{Keep, SummarizationMiddleware, Trigger};
use deepagent_runtime::{create_deep_agent, DeepAgentOptions};

/// Ignores history entirely and always gives a final answer, so the fold
/// (driven purely by message count here) is visible through the kernel
/// without needing a multi-turn tool-call scripted model.
struct AlwaysFinalAnswer;

#[async_trait]
impl ChatModel for AlwaysFinalAnswer {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        Ok(ChatResponse { message: Message::ai("noted"), usage: None })
    }
    fn profile(&self) -> Option<ModelProfile> {
        None
    }
}

#[tokio::test]
async fn summarization_is_wired_into_the_kernel_and_runs_before_the_model_sees_history() {
    let backend = Arc::new(StateBackend::new());
    let mut options = DeepAgentOptions::new(backend);
    options.enable_subagents = false;
    options.enable_skills = false;
    options.enable_memory = false;
    // enable_summarization stays at its true default; nothing here forces a
    // fold (the scripted model's context is tiny), this just proves the
    // middleware is present and doesn't break a normal run.

    let agent = create_deep_agent(Arc::new(AlwaysFinalAnswer), options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("hi")])).await.unwrap();
    assert_eq!(result.into_state().last_message().unwrap().content(), "noted");
}

#[tokio::test]
async fn fold_never_splits_a_tool_call_from_its_result_and_offloads_to_backend() {
    use deepagent_core::ToolCall;
    use serde_json::json;

    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(AlwaysFinalAnswer);
    let mw = SummarizationMiddleware::new(backend.clone(), model).with_trigger(Trigger::Messages(4)).with_keep(Keep::Messages(1));

    let tc = ToolCall { id: "tc1".into(), name: "search".into(), arguments: json!({"q": "rust"}) };
    let mut request = deepagent_middleware::ModelRequest {
        messages: vec![
            Message::human("find something"),
            Message::ai_with_tool_calls("", vec![tc]),
            Message::tool("found it", "tc1"),
            Message::human("great, now summarize"),
        ],
        tools: vec![],
        tool_choice: None,
        system_prompt: None,
    };

    mw.before_model(&mut request).await.unwrap();

    // The synthetic summary message replaced everything up to (and
    // including) the tool-call/tool-result pair as one unit — never a bare
    // tool-call or a bare tool-result on its own.
    assert!(request.messages[0].content().contains("summary"));
    assert!(!request.messages.iter().any(|m| m.is_tool() && m.tool_call_id() == Some("tc1")));

    let offloaded = backend.ls_info("/summaries").await.unwrap();
    assert_eq!(offloaded.len(), 1);
}
