use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{DeepAgentError, Message, Tool, ToolDefinition};
use deepagent_graph::{CompiledGraph, MessageState};
use deepagent_middleware::AgentMiddleware;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::backend::FileData;

/// Definition of a custom sub-agent type available to the `task` tool.
/// Unlike the implicit `general-purpose` entry, a custom definition does not
/// inherit skills and may override the system prompt and tool set (model,
/// middleware and HITL overrides are left to a follow-up — see DESIGN.md).
#[derive(Clone)]
pub struct SubAgentDef {
    pub name: String,
    pub description: String,
    pub system_prompt: Option<String>,
    pub tools: Option<Vec<Arc<dyn Tool>>>,
}

impl SubAgentDef {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), system_prompt: None, tools: None }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Builds the compiled graph for a given sub-agent type, recursing into
/// `create_deep_agent` one level deeper. Supplied by the kernel (`lib.rs`)
/// rather than constructed here, so this middleware has no dependency on
/// `DeepAgentOptions` and no import cycle with the crate root.
pub type SubagentGraphFactory =
    Arc<dyn Fn(&str) -> Result<Arc<CompiledGraph<MessageState>>, DeepAgentError> + Send + Sync>;

/// Validates `subagent_type` against the configured custom agents plus an
/// implicit `general-purpose` default.
pub struct SubagentRegistry {
    custom: Vec<SubAgentDef>,
    default_enabled: bool,
}

impl SubagentRegistry {
    pub fn new(custom: Vec<SubAgentDef>, default_enabled: bool) -> Self {
        Self { custom, default_enabled }
    }

    pub fn is_valid(&self, name: &str) -> bool {
        (self.default_enabled && name == "general-purpose") || self.custom.iter().any(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&SubAgentDef> {
        self.custom.iter().find(|d| d.name == name)
    }

    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self.custom.iter().map(|d| (d.name.clone(), d.description.clone())).collect();
        if self.default_enabled {
            out.push(("general-purpose".to_string(), "A general-purpose agent for complex, multi-step tasks".to_string()));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// SubagentExecution
// ---------------------------------------------------------------------------

enum ExecutionState {
    Pending,
    Completed(MessageState),
    Errored(String),
}

/// Wraps a spawned sub-agent run. The pump task is started eagerly on
/// construction so execution begins immediately, independent of when (or
/// whether) a caller awaits `result()`.
pub struct SubagentExecution {
    subagent_type: String,
    state: Arc<RwLock<ExecutionState>>,
    completion: watch::Receiver<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SubagentExecution {
    pub fn spawn(subagent_type: impl Into<String>, graph: Arc<CompiledGraph<MessageState>>, input: MessageState) -> Arc<Self> {
        let state = Arc::new(RwLock::new(ExecutionState::Pending));
        let (tx, rx) = watch::channel(false);
        let state_for_task = state.clone();

        let handle = tokio::spawn(async move {
            let outcome = graph.invoke(input).await;
            let mut guard = state_for_task.write().await;
            *guard = match outcome {
                Ok(result) => ExecutionState::Completed(result.into_state()),
                Err(e) => ExecutionState::Errored(e.to_string()),
            };
            drop(guard);
            let _ = tx.send(true);
        });

        Arc::new(Self { subagent_type: subagent_type.into(), state, completion: rx, handle: Mutex::new(Some(handle)) })
    }

    pub fn subagent_type(&self) -> &str {
        &self.subagent_type
    }

    pub async fn is_pending(&self) -> bool {
        matches!(*self.state.read().await, ExecutionState::Pending)
    }

    /// Latest known state; `None` while still pending.
    pub async fn snapshot(&self) -> Option<MessageState> {
        match &*self.state.read().await {
            ExecutionState::Completed(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Awaits completion. Safe to call more than once; the error is cached
    /// rather than re-awaited against an already-closed channel.
    pub async fn result(&self) -> Result<MessageState, DeepAgentError> {
        let mut rx = self.completion.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        match &*self.state.read().await {
            ExecutionState::Completed(s) => Ok(s.clone()),
            ExecutionState::Errored(e) => Err(DeepAgentError::Tool(e.clone())),
            ExecutionState::Pending => Err(DeepAgentError::Tool("subagent task ended without a result".into())),
        }
    }

    pub async fn kill(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        let mut guard = self.state.write().await;
        if matches!(*guard, ExecutionState::Pending) {
            *guard = ExecutionState::Errored("killed".into());
        }
    }
}

/// What to do with a task-map entry: add a new execution, or remove one that
/// has been reconciled.
pub enum TaskUpdate {
    Add(Arc<SubagentExecution>),
    Remove,
}

pub fn merge_tasks(current: &mut HashMap<String, Arc<SubagentExecution>>, update: HashMap<String, TaskUpdate>) {
    for (key, value) in update {
        match value {
            TaskUpdate::Add(execution) => {
                current.insert(key, execution);
            }
            TaskUpdate::Remove => {
                current.remove(&key);
            }
        }
    }
}

/// Reference-identity diff: files in `post` that are either new or whose
/// `Arc` pointer differs from `pre`. Content comparison would silently
/// clobber a parallel sub-agent's write that happens to produce identical
/// bytes to a stale pre-snapshot; pointer identity can't collide that way.
pub fn diff_by_reference(pre: &HashMap<String, Arc<FileData>>, post: &HashMap<String, Arc<FileData>>) -> HashMap<String, Arc<FileData>> {
    post.iter()
        .filter(|(key, value)| match pre.get(*key) {
            Some(existing) => !Arc::ptr_eq(existing, value),
            None => true,
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// SubAgentMiddleware
// ---------------------------------------------------------------------------

/// Contributes the `task` tool for spawning child agents, bounded by
/// `max_depth`. `task` returns a "Task initiated" result immediately without
/// awaiting the sub-agent, so parallel dispatches in one assistant message
/// run concurrently rather than one after another. Completed tasks are
/// reconciled in `before_model` (so the parent sees the result on its very
/// next call) and again in `after_agent` as a final sweep: each finished
/// task's transcript is folded into a synthetic `[Task Result]` human
/// message (the graph's router loops back to "agent" on a non-final last
/// message rather than ending the run).
pub struct SubAgentMiddleware {
    graph_factory: SubagentGraphFactory,
    registry: Arc<SubagentRegistry>,
    max_depth: usize,
    current_depth: Arc<AtomicUsize>,
    tasks: Arc<RwLock<HashMap<String, Arc<SubagentExecution>>>>,
}

impl SubAgentMiddleware {
    /// `current_depth` is shared (via `Arc`) with every agent in the same
    /// recursive tree, including children the `graph_factory` builds, so the
    /// depth cap is enforced globally rather than resetting at each level.
    pub fn new(graph_factory: SubagentGraphFactory, registry: SubagentRegistry, max_depth: usize, current_depth: Arc<AtomicUsize>) -> Self {
        Self { graph_factory, registry: Arc::new(registry), max_depth, current_depth, tasks: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn task_tool(&self) -> Arc<dyn Tool> {
        Arc::new(TaskTool {
            graph_factory: self.graph_factory.clone(),
            registry: self.registry.clone(),
            max_depth: self.max_depth,
            current_depth: self.current_depth.clone(),
            tasks: self.tasks.clone(),
        })
    }

    async fn reconcile(&self, messages: &mut Vec<Message>, tasks: &mut HashMap<String, Arc<SubagentExecution>>, finished: Vec<String>) {
        for id in finished {
            if let Some(execution) = tasks.remove(&id) {
                self.current_depth.fetch_sub(1, Ordering::SeqCst);
                let subagent_type = execution.subagent_type().to_string();
                let message = match execution.result().await {
                    Ok(final_state) => {
                        let text = final_state
                            .last_message()
                            .map(|m| m.content().to_string())
                            .unwrap_or_else(|| "Sub-agent completed with no response".to_string());
                        format!("[Task Result] The \"{subagent_type}\" task has completed.\n\n{text}")
                    }
                    Err(e) => format!("[Task Result] The \"{subagent_type}\" task failed: {e}"),
                };
                messages.push(Message::human(message));
            }
        }
    }

    /// Folds in whatever sub-agents have already finished, without waiting
    /// on any still-pending one. Safe to call before every model turn: a
    /// sub-agent still running in the background is simply left in `tasks`
    /// for a later call to pick up, so parallel dispatches keep running
    /// concurrently instead of stalling the next model call.
    async fn sweep_completed(&self, messages: &mut Vec<Message>) -> Result<(), DeepAgentError> {
        let mut tasks = self.tasks.write().await;
        if tasks.is_empty() {
            return Ok(());
        }

        let mut finished: Vec<String> = Vec::new();
        for (id, execution) in tasks.iter() {
            if !execution.is_pending().await {
                finished.push(id.clone());
            }
        }

        self.reconcile(messages, &mut tasks, finished).await;
        Ok(())
    }

    /// Same reconciliation, but blocks on at least one still-pending
    /// sub-agent when none has finished yet. Used only at end-of-run
    /// (`after_agent`, when the model has already produced a final answer)
    /// so the run doesn't end with an orphaned sub-agent nobody will ever
    /// reconcile.
    async fn sweep_completed_blocking(&self, messages: &mut Vec<Message>) -> Result<(), DeepAgentError> {
        let mut tasks = self.tasks.write().await;
        if tasks.is_empty() {
            return Ok(());
        }

        let mut finished: Vec<String> = Vec::new();
        for (id, execution) in tasks.iter() {
            if !execution.is_pending().await {
                finished.push(id.clone());
            }
        }

        if finished.is_empty() {
            let waiters: Vec<_> = tasks
                .iter()
                .map(|(id, execution)| {
                    let id = id.clone();
                    let execution = execution.clone();
                    Box::pin(async move {
                        let _ = execution.result().await;
                        id
                    }) as std::pin::Pin<Box<dyn std::future::Future<Output = String> + Send>>
                })
                .collect();
            if !waiters.is_empty() {
                let (finished_id, _, _) = futures::future::select_all(waiters).await;
                finished.push(finished_id);
            }
        }

        self.reconcile(messages, &mut tasks, finished).await;
        Ok(())
    }
}

#[async_trait]
impl AgentMiddleware for SubAgentMiddleware {
    /// Reconciles any sub-agent that has already finished so its result is
    /// visible to the *next* model call, rather than only at end-of-run.
    /// Non-blocking: a task still running is left for a later call.
    async fn before_model(&self, request: &mut deepagent_middleware::ModelRequest) -> Result<(), DeepAgentError> {
        self.sweep_completed(&mut request.messages).await
    }

    async fn after_agent(&self, messages: &mut Vec<Message>) -> Result<(), DeepAgentError> {
        self.sweep_completed_blocking(messages).await
    }
}

struct TaskTool {
    graph_factory: SubagentGraphFactory,
    registry: Arc<SubagentRegistry>,
    max_depth: usize,
    current_depth: Arc<AtomicUsize>,
    tasks: Arc<RwLock<HashMap<String, Arc<SubagentExecution>>>>,
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &'static str {
        "task"
    }

    fn description(&self) -> &'static str {
        "Spawn a sub-agent to handle a complex, multi-step task autonomously"
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Detailed task description for the sub-agent"},
                "subagent_type": {"type": "string", "description": "Which registered sub-agent type to spawn (default: general-purpose)"}
            },
            "required": ["description"]
        }))
    }

    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().into(), description: self.description().into(), parameters: self.parameters().unwrap() }
    }

    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| DeepAgentError::Validation("missing 'description'".into()))?;
        let subagent_type = args.get("subagent_type").and_then(Value::as_str).unwrap_or("general-purpose");

        if !self.registry.is_valid(subagent_type) {
            return Err(DeepAgentError::Validation(format!("unknown subagent_type '{subagent_type}'")));
        }

        let depth = self.current_depth.load(Ordering::SeqCst);
        if depth >= self.max_depth {
            return Err(DeepAgentError::Validation(format!("max subagent depth ({}) exceeded", self.max_depth)));
        }

        let graph = (self.graph_factory)(subagent_type)?;
        let input = MessageState::with_messages(vec![Message::human(description)]);

        self.current_depth.fetch_add(1, Ordering::SeqCst);
        let execution = SubagentExecution::spawn(subagent_type, graph, input);
        let task_id = uuid::Uuid::new_v4().to_string();
        self.tasks.write().await.insert(task_id, execution);

        // Return immediately: the sub-agent runs in the background
        // (`SubagentExecution::spawn` starts its pump task eagerly), and its
        // result is folded into the conversation later by
        // `SubAgentMiddleware`'s `before_model`/`after_agent` sweeps. This
        // lets multiple `task` calls issued in one assistant message run
        // concurrently instead of one after another.
        Ok(Value::String(format!(
            "Task initiated. The \"{subagent_type}\" sub-agent is now working in the background; \
             its result will be added to the conversation once it completes."
        )))
    }
}
