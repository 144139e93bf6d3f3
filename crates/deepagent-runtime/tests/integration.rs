use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError, Message, ToolCall};
use deepagent_graph::MessageState;
use deepagent_runtime::backend::{Backend, StateBackend};
use deepagent_runtime::{create_deep_agent, DeepAgentOptions};

/// First call writes a file, second call gives a final answer.
struct WritesThenAnswers {
    call_count: AtomicUsize,
}

impl WritesThenAnswers {
    fn new() -> Self {
        Self { call_count: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl ChatModel for WritesThenAnswers {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        let message = match n {
            0 => Message::ai_with_tool_calls(
                "I'll write a file.",
                vec![ToolCall {
                    id: "tc_1".to_string(),
                    name: "write_file".to_string(),
                    arguments: serde_json::json!({"path": "/hello.txt", "content": "Hello from deep agent!"}),
                }],
            ),
            _ => Message::ai("Done! I wrote hello.txt."),
        };
        Ok(ChatResponse { message, usage: None })
    }
}

#[tokio::test]
async fn full_deep_agent_e2e_writes_a_file_and_answers() {
    let backend = Arc::new(StateBackend::new());
    let model: Arc<dyn ChatModel> = Arc::new(WritesThenAnswers::new());

    let mut options = DeepAgentOptions::new(backend.clone());
    options.enable_subagents = false;
    options.enable_skills = false;
    options.enable_memory = false;

    let agent = create_deep_agent(model, options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("Write hello.txt")])).await.unwrap();
    let final_state = result.into_state();

    let content = backend.read_raw("/hello.txt").await.unwrap();
    assert_eq!(content.text(), "Hello from deep agent!");
    assert!(final_state.last_message().unwrap().content().contains("hello.txt"));
}

#[tokio::test]
async fn custom_system_prompt_reaches_the_model() {
    struct RecordsSystemPrompt {
        seen: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordsSystemPrompt {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            *self.seen.lock().unwrap() = request.system_prompt.clone();
            Ok(ChatResponse { message: Message::ai("ok"), usage: None })
        }
    }

    let backend = Arc::new(StateBackend::new());
    let model = Arc::new(RecordsSystemPrompt { seen: std::sync::Mutex::new(None) });
    let mut options = DeepAgentOptions::new(backend);
    options.system_prompt = Some("You are a coding assistant.".to_string());
    options.enable_subagents = false;
    options.enable_skills = false;
    options.enable_memory = false;

    let agent = create_deep_agent(model.clone(), options).unwrap();
    agent.invoke(MessageState::with_messages(vec![Message::human("hi")])).await.unwrap();

    assert_eq!(model.seen.lock().unwrap().as_deref(), Some("You are a coding assistant."));
}

#[tokio::test]
async fn all_optional_features_disabled_still_answers() {
    struct SimpleModel;

    #[async_trait]
    impl ChatModel for SimpleModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            Ok(ChatResponse { message: Message::ai("Hello!"), usage: None })
        }
    }

    let backend = Arc::new(StateBackend::new());
    let mut options = DeepAgentOptions::new(backend);
    options.enable_subagents = false;
    options.enable_filesystem = false;
    options.enable_skills = false;
    options.enable_memory = false;
    options.enable_todos = false;
    options.enable_summarization = false;

    let agent = create_deep_agent(Arc::new(SimpleModel), options).unwrap();
    let result = agent.invoke(MessageState::with_messages(vec![Message::human("Hi")])).await.unwrap();
    assert_eq!(result.into_state().last_message().unwrap().content(), "Hello!");
}

#[tokio::test]
async fn memory_file_is_visible_to_the_model() {
    struct RecordsSystemPrompt {
        seen: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordsSystemPrompt {
        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            *self.seen.lock().unwrap() = request.system_prompt.clone();
            Ok(ChatResponse { message: Message::ai("I read the memory."), usage: None })
        }
    }

    let backend = Arc::new(StateBackend::new());
    backend.write("/AGENTS.md", "# Memory\nAlways be helpful.").await.unwrap();

    let model = Arc::new(RecordsSystemPrompt { seen: std::sync::Mutex::new(None) });
    let mut options = DeepAgentOptions::new(backend);
    options.enable_subagents = false;
    options.enable_filesystem = false;
    options.enable_skills = false;

    let agent = create_deep_agent(model.clone(), options).unwrap();
    agent.invoke(MessageState::with_messages(vec![Message::human("What do you remember?")])).await.unwrap();

    assert!(model.seen.lock().unwrap().as_ref().unwrap().contains("Always be helpful."));
}

#[tokio::test]
async fn default_options_have_the_documented_defaults() {
    let backend = Arc::new(StateBackend::new());
    let options = DeepAgentOptions::new(backend);

    assert_eq!(options.eviction_threshold, deepagent_runtime::middleware::filesystem::DEFAULT_TOOL_TOKEN_LIMIT_BEFORE_EVICT);
    assert_eq!(options.max_subagent_depth, 3);
    assert_eq!(options.skills_dirs, vec![".skills".to_string()]);
    assert_eq!(options.memory_files, vec!["/AGENTS.md".to_string()]);
    assert!(options.enable_subagents);
    assert!(options.enable_default_subagent);
    assert!(options.enable_filesystem);
    assert!(options.enable_todos);
    assert!(options.enable_skills);
    assert!(options.enable_memory);
    assert!(options.enable_summarization);
}
