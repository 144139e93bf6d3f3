//! Deep agent runtime: an opinionated harness bundling filesystem tools,
//! sub-agent spawning, skills, memory, auto-summarization and human review —
//! all implemented as [`AgentMiddleware`](deepagent_middleware::AgentMiddleware)
//! atop the generic [`deepagent_graph`] message/tool loop.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use deepagent_runtime::{create_deep_agent, DeepAgentOptions, backend::StateBackend};
//!
//! let backend = Arc::new(StateBackend::new());
//! let options = DeepAgentOptions::new(backend);
//! let agent = create_deep_agent(model, options)?;
//! let result = agent.invoke(MessageState::with_messages(vec![
//!     Message::human("Write hello.txt"),
//! ])).await?;
//! ```

pub mod backend;
pub mod middleware;

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use deepagent_core::{ChatModel, DeepAgentError, Store, Tool};
use deepagent_graph::{create_agent, AgentOptions, Checkpointer, CompiledGraph, MessageState};
use deepagent_macros::traceable;
use deepagent_middleware::AgentMiddleware;

use backend::Backend;
pub use middleware::hitl::{ActionRequest, Decision, DecisionKind, HitlDecisionProvider, HitlToolConfig};
pub use middleware::subagent::SubAgentDef;

/// Configuration for [`create_deep_agent`].
#[derive(Clone)]
pub struct DeepAgentOptions {
    /// Backend for filesystem operations.
    pub backend: Arc<dyn Backend>,
    /// Optional system prompt prepended to all model calls.
    pub system_prompt: Option<String>,
    /// Additional tools beyond the built-in filesystem/todo/task tools.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Additional middleware beyond the built-in stack, run after it and
    /// before the sub-agent middleware.
    pub middleware: Vec<Arc<dyn AgentMiddleware>>,
    /// Optional checkpointer for graph state persistence. Required when
    /// `interrupt_on` is non-empty.
    pub checkpointer: Option<Arc<dyn Checkpointer>>,
    /// Optional store for runtime tool injection.
    pub store: Option<Arc<dyn Store>>,
    /// Token count above which tool results are evicted to files (default 4,000).
    pub eviction_threshold: usize,
    /// Maximum nested sub-agent depth, shared across the whole recursive
    /// tree rooted at this agent (default 3).
    pub max_subagent_depth: usize,
    /// Skills source directories in the backend (default `[".skills"]`).
    pub skills_dirs: Vec<String>,
    /// Memory file paths in the backend, rendered in order (default `["/AGENTS.md"]`).
    pub memory_files: Vec<String>,
    /// Custom sub-agent definitions for the `task` tool.
    pub subagents: Vec<SubAgentDef>,
    /// Tool names that pause for human review, and which decisions each allows.
    pub interrupt_on: HashMap<String, HitlToolConfig>,
    /// Resolves a pending HITL decision. Required when `interrupt_on` is non-empty.
    pub hitl_provider: Option<Arc<dyn HitlDecisionProvider>>,
    /// Enable sub-agent spawning via the `task` tool (default true).
    pub enable_subagents: bool,
    /// Enable the implicit `general-purpose` sub-agent type (default true).
    pub enable_default_subagent: bool,
    /// Enable filesystem tools + middleware (default true).
    pub enable_filesystem: bool,
    /// Enable the todo list tool (default true).
    pub enable_todos: bool,
    /// Enable skills middleware (default true).
    pub enable_skills: bool,
    /// Enable memory middleware (default true).
    pub enable_memory: bool,
    /// Enable summarization middleware (default true).
    pub enable_summarization: bool,
}

impl DeepAgentOptions {
    /// Options with the given backend and the documented defaults.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            system_prompt: None,
            tools: Vec::new(),
            middleware: Vec::new(),
            checkpointer: None,
            store: None,
            eviction_threshold: middleware::filesystem::DEFAULT_TOOL_TOKEN_LIMIT_BEFORE_EVICT,
            max_subagent_depth: 3,
            skills_dirs: vec![".skills".to_string()],
            memory_files: vec!["/AGENTS.md".to_string()],
            subagents: Vec::new(),
            interrupt_on: HashMap::new(),
            hitl_provider: None,
            enable_subagents: true,
            enable_default_subagent: true,
            enable_filesystem: true,
            enable_todos: true,
            enable_skills: true,
            enable_memory: true,
            enable_summarization: true,
        }
    }
}

/// Creates a deep agent with the given model and options.
///
/// Assembles, in order (see `SPEC_FULL.md` §4.G):
/// 1. Summarization middleware (if enabled).
/// 2. Filesystem middleware + tools (if enabled).
/// 3. Todo middleware + `write_todos` tool (if enabled).
/// 4. Skills middleware (if enabled).
/// 5. Memory middleware (if enabled).
/// 6. User-supplied middleware.
/// 7. Sub-agent middleware + `task` tool, always last among built-ins so it
///    sees the fully assembled tool set.
/// 8. HITL middleware (if `interrupt_on` is non-empty).
/// 9. Patch-tool-calls middleware, always last of all, so it sees every
///    other middleware's `after_agent` message appends.
#[traceable(skip = "model,options")]
pub fn create_deep_agent(model: Arc<dyn ChatModel>, options: DeepAgentOptions) -> Result<CompiledGraph<MessageState>, DeepAgentError> {
    create_deep_agent_with_depth(model, options, Arc::new(AtomicUsize::new(0)))
}

fn create_deep_agent_with_depth(
    model: Arc<dyn ChatModel>,
    options: DeepAgentOptions,
    depth_counter: Arc<AtomicUsize>,
) -> Result<CompiledGraph<MessageState>, DeepAgentError> {
    if !options.interrupt_on.is_empty() {
        if options.checkpointer.is_none() {
            return Err(DeepAgentError::Config("interrupt_on requires a checkpointer".to_string()));
        }
        if options.hitl_provider.is_none() {
            return Err(DeepAgentError::Config("interrupt_on requires a hitl_provider".to_string()));
        }
    }

    let mut all_middleware: Vec<Arc<dyn AgentMiddleware>> = Vec::new();
    let mut all_tools: Vec<Arc<dyn Tool>> = Vec::new();

    if options.enable_summarization {
        all_middleware.push(Arc::new(middleware::summarization::SummarizationMiddleware::new(options.backend.clone(), model.clone())));
    }

    if options.enable_filesystem {
        let fs = middleware::filesystem::FilesystemMiddleware::new(options.backend.clone()).with_eviction_threshold(options.eviction_threshold);
        all_tools.extend(fs.tools());
        all_middleware.push(Arc::new(fs));
    }

    if options.enable_todos {
        let todo_mw = middleware::todo::TodoMiddleware::new();
        all_tools.push(todo_mw.write_todos_tool());
        all_middleware.push(Arc::new(todo_mw));
    }

    if options.enable_skills {
        all_middleware.push(Arc::new(middleware::skills::SkillsMiddleware::new(options.backend.clone(), options.skills_dirs.clone())));
    }

    if options.enable_memory {
        all_middleware.push(Arc::new(middleware::memory::MemoryMiddleware::new(options.backend.clone(), options.memory_files.clone())));
    }

    all_middleware.extend(options.middleware.clone());

    if options.enable_subagents {
        let registry = middleware::subagent::SubagentRegistry::new(options.subagents.clone(), options.enable_default_subagent);

        let model_for_children = model.clone();
        let template = options.clone();
        let depth_for_children = depth_counter.clone();
        let graph_factory: middleware::subagent::SubagentGraphFactory = Arc::new(move |subagent_type: &str| {
            let mut child = template.clone();
            // Custom sub-agent types get their own system prompt/tool set and
            // skip skill injection; the implicit general-purpose type inherits
            // the parent's configuration wholesale.
            if subagent_type != "general-purpose" {
                if let Some(def) = child.subagents.iter().find(|d| d.name == subagent_type).cloned() {
                    child.enable_skills = false;
                    if let Some(prompt) = def.system_prompt {
                        child.system_prompt = Some(prompt);
                    }
                    if let Some(tools) = def.tools {
                        child.tools = tools;
                    }
                }
            }
            // A sub-agent never spawns HITL-gated calls of its own; only the
            // top-level graph owns the checkpointer needed to suspend.
            child.interrupt_on = HashMap::new();
            child.hitl_provider = None;
            let graph = create_deep_agent_with_depth(model_for_children.clone(), child, depth_for_children.clone())?;
            Ok(Arc::new(graph))
        });

        let subagent_mw = middleware::subagent::SubAgentMiddleware::new(graph_factory, registry, options.max_subagent_depth, depth_counter.clone());
        all_tools.push(subagent_mw.task_tool());
        all_middleware.push(Arc::new(subagent_mw));
    }

    if !options.interrupt_on.is_empty() {
        let provider = options.hitl_provider.clone().expect("checked above");
        all_middleware.push(Arc::new(middleware::hitl::HitlMiddleware::new(options.interrupt_on.clone(), provider)));
    }

    all_middleware.push(Arc::new(middleware::patch_tool_calls::PatchToolCallsMiddleware));

    all_tools.extend(options.tools.clone());

    let agent_options = AgentOptions {
        checkpointer: options.checkpointer.clone(),
        interrupt_before: Vec::new(),
        interrupt_after: Vec::new(),
        system_prompt: options.system_prompt.clone(),
        middleware: all_middleware,
        store: options.store.clone(),
        name: Some("deep_agent".to_string()),
        pre_model_hook: None,
        post_model_hook: None,
        response_format: None,
    };

    create_agent(model, all_tools, agent_options)
}
