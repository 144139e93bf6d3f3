use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{estimate_tokens, now_iso8601, ChatModel, ChatRequest, DeepAgentError, Message};
use deepagent_middleware::{AgentMiddleware, ModelCaller, ModelRequest, ModelResponse};
use tokio::sync::RwLock;

use crate::backend::Backend;

const DEFAULT_HISTORY_PATH_PREFIX: &str = "/summaries";
const DEFAULT_TRIM_TOKENS_TO_SUMMARIZE: usize = 8_000;

const PROFILE_AWARE_TRIGGER_FRACTION: f64 = 0.85;
const PROFILE_AWARE_KEEP_FRACTION: f64 = 0.10;
const PROFILE_BLIND_TRIGGER_TOKENS: usize = 170_000;
const PROFILE_BLIND_KEEP_MESSAGES: usize = 6;

/// When to fold older history into a summary.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Messages(usize),
    Tokens(usize),
    Fraction(f64),
}

/// How much recent history to keep verbatim once a fold happens.
#[derive(Debug, Clone, Copy)]
pub enum Keep {
    Messages(usize),
    Tokens(usize),
    Fraction(f64),
}

/// Record of the most recent fold: everything at and before `cutoff_index`
/// (an index into the raw, ever-growing message list) has been replaced by
/// `summary_message` for the purposes of `effective_messages`.
#[derive(Debug, Clone)]
pub struct SummarizationEvent {
    pub cutoff_index: usize,
    pub summary_message: Message,
    pub file_path: Option<String>,
}

/// Never splits an assistant tool-call from its tool-result: if `raw_cutoff`
/// lands on a tool-result message, walks back to the assistant message that
/// issued it; if none is found (an orphaned tool-result at the very start),
/// advances forward past it instead.
pub fn safe_cutoff(messages: &[Message], raw_cutoff: usize) -> usize {
    let raw_cutoff = raw_cutoff.min(messages.len());
    if raw_cutoff == 0 || raw_cutoff >= messages.len() {
        return raw_cutoff;
    }
    if !messages[raw_cutoff].is_tool() {
        return raw_cutoff;
    }
    if let Some(id) = messages[raw_cutoff].tool_call_id() {
        for i in (0..raw_cutoff).rev() {
            if messages[i].is_ai() && messages[i].tool_calls().iter().any(|c| c.id == id) {
                return i;
            }
        }
    }
    let mut idx = raw_cutoff;
    while idx < messages.len() && messages[idx].is_tool() {
        idx += 1;
    }
    idx
}

fn keep_count_by_tokens(messages: &[Message], budget: usize) -> usize {
    let mut count = 0;
    let mut tokens = 0;
    for message in messages.iter().rev() {
        let cost = estimate_tokens(std::slice::from_ref(message));
        if count > 0 && tokens + cost > budget {
            break;
        }
        tokens += cost;
        count += 1;
    }
    count
}

fn render_transcript(messages: &[Message]) -> String {
    messages.iter().map(|m| format!("## {}\n{}", m.role(), m.content())).collect::<Vec<_>>().join("\n\n")
}

/// Folds aging conversation history into a single synthetic summary message
/// once a token/message budget is crossed, offloading the displaced raw
/// transcript to the backend so it isn't lost, only evicted from context.
///
/// Tracks its fold state (`SummarizationEvent`) as middleware-owned interior
/// state rather than a field on graph state: `state.messages` only ever
/// grows (nothing here rewrites or removes prior messages), so an event
/// recorded against a raw index at fold time stays valid for every later
/// call in the run.
pub struct SummarizationMiddleware {
    backend: Arc<dyn Backend>,
    model: Arc<dyn ChatModel>,
    trigger: Trigger,
    keep: Keep,
    history_path_prefix: String,
    trim_tokens_to_summarize: usize,
    session_id: String,
    event: Arc<RwLock<Option<SummarizationEvent>>>,
}

impl SummarizationMiddleware {
    pub fn new(backend: Arc<dyn Backend>, model: Arc<dyn ChatModel>) -> Self {
        let (trigger, keep) = match model.profile().and_then(|p| p.max_input_tokens) {
            Some(_) => (Trigger::Fraction(PROFILE_AWARE_TRIGGER_FRACTION), Keep::Fraction(PROFILE_AWARE_KEEP_FRACTION)),
            None => (Trigger::Tokens(PROFILE_BLIND_TRIGGER_TOKENS), Keep::Messages(PROFILE_BLIND_KEEP_MESSAGES)),
        };
        Self {
            backend,
            model,
            trigger,
            keep,
            history_path_prefix: DEFAULT_HISTORY_PATH_PREFIX.to_string(),
            trim_tokens_to_summarize: DEFAULT_TRIM_TOKENS_TO_SUMMARIZE,
            session_id: uuid::Uuid::new_v4().to_string(),
            event: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_keep(mut self, keep: Keep) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_history_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.history_path_prefix = prefix.into();
        self
    }

    fn max_input_tokens(&self) -> Option<usize> {
        self.model.profile().and_then(|p| p.max_input_tokens)
    }

    fn request_tokens(request: &ModelRequest) -> usize {
        let mut messages = request.messages.clone();
        if let Some(prompt) = &request.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        let mut total = estimate_tokens(&messages);
        for tool in &request.tools {
            total += (tool.description.len() + tool.parameters.to_string().len()) / 4 + 1;
        }
        total
    }

    fn threshold_tokens(&self) -> Option<usize> {
        match self.trigger {
            Trigger::Tokens(t) => Some(t),
            Trigger::Fraction(f) => self.max_input_tokens().map(|m| (m as f64 * f).floor() as usize),
            Trigger::Messages(_) => None,
        }
    }

    fn should_trigger(&self, request: &ModelRequest) -> bool {
        match self.trigger {
            Trigger::Messages(n) => request.messages.len() >= n,
            Trigger::Tokens(_) | Trigger::Fraction(_) => {
                self.threshold_tokens().is_some_and(|t| Self::request_tokens(request) >= t)
            }
        }
    }

    fn keep_count(&self, messages: &[Message]) -> usize {
        match self.keep {
            Keep::Messages(n) => n.min(messages.len()),
            Keep::Tokens(t) => keep_count_by_tokens(messages, t),
            Keep::Fraction(f) => {
                let budget = self.max_input_tokens().map(|m| (m as f64 * f).floor() as usize).unwrap_or(PROFILE_BLIND_TRIGGER_TOKENS / 8);
                keep_count_by_tokens(messages, budget)
            }
        }
    }

    /// Reconstructs `[summary] + tail` from the raw, ever-growing message
    /// list without rewriting it, per the most recent fold (if any).
    pub async fn effective_messages(&self, raw_messages: &[Message]) -> Vec<Message> {
        match &*self.event.read().await {
            Some(event) => {
                let mut out = vec![event.summary_message.clone()];
                out.extend(raw_messages[event.cutoff_index.min(raw_messages.len())..].iter().cloned());
                out
            }
            None => raw_messages.to_vec(),
        }
    }

    async fn offload(&self, path: &str, section: &str) -> Result<(), DeepAgentError> {
        match self.backend.read_raw(path).await {
            Ok(existing) => {
                let old_text = existing.text();
                let new_text = format!("{old_text}{section}");
                self.backend.edit(path, &old_text, &new_text, false).await?;
            }
            Err(_) => {
                self.backend.write(path, section.trim_start_matches('\n')).await?;
            }
        }
        Ok(())
    }

    /// Runs the fold: determine a safe cutoff over the compacted view
    /// already installed in `request.messages`, offload the displaced slice,
    /// summarize it, and splice the result back in place.
    async fn summarize(&self, request: &mut ModelRequest, base_cutoff: usize) -> Result<(), DeepAgentError> {
        let compacted = request.messages.clone();
        let keep_n = self.keep_count(&compacted);
        if compacted.len() <= keep_n {
            return Ok(());
        }

        let raw_split = compacted.len() - keep_n;
        let split = safe_cutoff(&compacted, raw_split);
        if split == 0 {
            return Ok(());
        }

        let to_summarize = &compacted[..split];
        let to_keep = compacted[split..].to_vec();

        let history_path = format!("{}/{}.md", self.history_path_prefix, self.session_id);
        let section = format!("\n\n## Offloaded at {}\n{}\n", now_iso8601(), render_transcript(to_summarize));
        self.offload(&history_path, &section).await?;

        let trimmed = {
            let trim_start = compacted.len().saturating_sub(keep_count_by_tokens(to_summarize, self.trim_tokens_to_summarize));
            &to_summarize[trim_start.min(to_summarize.len())..]
        };
        let prompt = format!(
            "Summarize the following conversation concisely, preserving key decisions, facts, and open threads:\n\n{}",
            render_transcript(trimmed)
        );
        let response = self.model.chat(ChatRequest::new(vec![Message::human(prompt)])).await?;

        // base_cutoff + split accounts for the offset introduced by a prior
        // fold's synthetic summary message occupying position 0.
        let new_cutoff = if base_cutoff == 0 { split } else { base_cutoff + split.saturating_sub(1) };
        let summary_message = Message::human(format!(
            "[Conversation summary; full history saved to {history_path}]\n{}",
            response.message.content()
        ))
        .with_id(format!("summary:{}:{new_cutoff}", self.session_id));

        *self.event.write().await =
            Some(SummarizationEvent { cutoff_index: new_cutoff, summary_message: summary_message.clone(), file_path: Some(history_path) });

        let mut new_messages = vec![summary_message];
        new_messages.extend(to_keep);
        request.messages = new_messages;
        Ok(())
    }
}

#[async_trait]
impl AgentMiddleware for SummarizationMiddleware {
    async fn before_model(&self, request: &mut ModelRequest) -> Result<(), DeepAgentError> {
        let base_cutoff = match &*self.event.read().await {
            Some(event) => event.cutoff_index,
            None => 0,
        };
        request.messages = self.effective_messages(&request.messages).await;

        if self.should_trigger(request) {
            self.summarize(request, base_cutoff).await?;
        }
        Ok(())
    }

    async fn wrap_model_call(&self, request: ModelRequest, next: &dyn ModelCaller) -> Result<ModelResponse, DeepAgentError> {
        match next.call(request.clone()).await {
            Ok(response) => Ok(response),
            Err(DeepAgentError::ContextOverflow(_)) => {
                let base_cutoff = match &*self.event.read().await {
                    Some(event) => event.cutoff_index,
                    None => 0,
                };
                let mut retry_request = request;
                retry_request.messages = self.effective_messages(&retry_request.messages).await;
                self.summarize(&mut retry_request, base_cutoff).await?;
                next.call(retry_request).await
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StateBackend;
    use deepagent_core::{ChatResponse, ModelProfile, ToolCall};
    use serde_json::json;

    struct FixedProfileModel {
        profile: Option<ModelProfile>,
    }

    #[async_trait]
    impl ChatModel for FixedProfileModel {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
            Ok(ChatResponse { message: Message::ai("a concise summary"), usage: None })
        }
        fn profile(&self) -> Option<ModelProfile> {
            self.profile.clone()
        }
    }

    struct EchoNext;

    #[async_trait]
    impl ModelCaller for EchoNext {
        async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError> {
            Ok(ModelResponse { message: Message::ai(format!("saw {} messages", request.messages.len())), usage: None })
        }
    }

    struct OverflowOnce {
        failed: tokio::sync::Mutex<bool>,
    }

    #[async_trait]
    impl ModelCaller for OverflowOnce {
        async fn call(&self, request: ModelRequest) -> Result<ModelResponse, DeepAgentError> {
            let mut failed = self.failed.lock().await;
            if !*failed {
                *failed = true;
                return Err(DeepAgentError::ContextOverflow("too many tokens".into()));
            }
            Ok(ModelResponse { message: Message::ai(format!("recovered with {} messages", request.messages.len())), usage: None })
        }
    }

    fn request(messages: Vec<Message>) -> ModelRequest {
        ModelRequest { messages, tools: vec![], tool_choice: None, system_prompt: None }
    }

    #[test]
    fn safe_cutoff_keeps_tool_call_and_result_together() {
        let tc = ToolCall { id: "tc1".into(), name: "x".into(), arguments: json!({}) };
        let messages = vec![
            Message::system("sys"),
            Message::human("user1"),
            Message::ai_with_tool_calls("", vec![tc]),
            Message::tool("result", "tc1"),
            Message::human("user2"),
        ];
        assert_eq!(safe_cutoff(&messages, 3), 2);
    }

    #[test]
    fn safe_cutoff_advances_past_orphan_tool_result() {
        let messages = vec![Message::tool("orphan", "ghost"), Message::human("next")];
        assert_eq!(safe_cutoff(&messages, 0), 1);
    }

    #[tokio::test]
    async fn triggers_on_message_count_and_offloads_to_backend() {
        let backend = Arc::new(StateBackend::new());
        let model = Arc::new(FixedProfileModel { profile: None });
        let mw = SummarizationMiddleware::new(backend.clone(), model).with_trigger(Trigger::Messages(4)).with_keep(Keep::Messages(1));

        let mut req = request(vec![Message::human("u1"), Message::ai("a1"), Message::human("u2"), Message::ai("a2")]);
        mw.before_model(&mut req).await.unwrap();

        assert_eq!(req.messages.len(), 2);
        assert!(req.messages[0].content().contains("a concise summary"));
        assert_eq!(req.messages[1].content(), "a2");
    }

    #[tokio::test]
    async fn does_not_trigger_below_threshold() {
        let backend = Arc::new(StateBackend::new());
        let model = Arc::new(FixedProfileModel { profile: None });
        let mw = SummarizationMiddleware::new(backend, model).with_trigger(Trigger::Messages(100));

        let mut req = request(vec![Message::human("u1"), Message::ai("a1")]);
        mw.before_model(&mut req).await.unwrap();
        assert_eq!(req.messages.len(), 2);
    }

    #[tokio::test]
    async fn idempotent_effective_messages_without_new_messages() {
        let backend = Arc::new(StateBackend::new());
        let model = Arc::new(FixedProfileModel { profile: None });
        let mw = SummarizationMiddleware::new(backend, model).with_trigger(Trigger::Messages(3)).with_keep(Keep::Messages(1));

        let raw = vec![Message::human("u1"), Message::ai("a1"), Message::human("u2")];
        let mut req = request(raw.clone());
        mw.before_model(&mut req).await.unwrap();
        let first = req.messages.clone();

        let mut req2 = request(raw);
        mw.before_model(&mut req2).await.unwrap();
        assert_eq!(first.len(), req2.messages.len());
        assert_eq!(first.last().unwrap().content(), req2.messages.last().unwrap().content());
    }

    #[tokio::test]
    async fn overflow_fallback_summarizes_and_retries_once() {
        let backend = Arc::new(StateBackend::new());
        let model = Arc::new(FixedProfileModel { profile: None });
        let mw = SummarizationMiddleware::new(backend, model).with_trigger(Trigger::Messages(1_000)).with_keep(Keep::Messages(1));

        let req = request(vec![Message::human("u1"), Message::ai("a1"), Message::human("u2")]);
        let next = OverflowOnce { failed: tokio::sync::Mutex::new(false) };
        let response = mw.wrap_model_call(req, &next).await.unwrap();
        assert!(response.message.content().starts_with("recovered with"));
    }
}
