//! The deep-agent middleware stack: filesystem, todo, subagent, HITL,
//! summarization, skills and memory, each a `deepagent_middleware::AgentMiddleware`.

pub mod filesystem;
pub mod hitl;
pub mod memory;
pub mod patch_tool_calls;
pub mod skills;
pub mod subagent;
pub mod summarization;
pub mod todo;
