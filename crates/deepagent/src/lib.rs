//! Deepagent — a controllable deep-agent runtime.
//!
//! This crate re-exports all deepagent sub-crates for single-import usage.
//! Enable features to control which modules are available.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `default` | `graph`, `middleware`, `tools` |
//! | `model-utils` | `ScriptedChatModel`, `BoundToolsChatModel` |
//! | `store` | `Store` trait + `InMemoryStore` |
//! | `macros` | `#[traceable]` |
//! | `runtime` | `default` + store + model-utils + the deep agent harness |
//! | `full` | every feature enabled |
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use deepagent::core::{ChatModel, Message, ChatRequest};
//! use deepagent::runtime::{create_deep_agent, DeepAgentOptions, backend::StateBackend};
//! ```

/// Core traits and types: `ChatModel`, `Message`, `Tool`, `DeepAgentError`, etc.
/// Always available.
pub use deepagent_core as core;

/// Graph engine: `StateGraph`, `CompiledGraph`, the prebuilt ReAct loop, checkpointing.
#[cfg(feature = "graph")]
pub use deepagent_graph as graph;

/// Middleware chain: `AgentMiddleware` trait, lifecycle hooks, built-in middlewares.
#[cfg(feature = "middleware")]
pub use deepagent_middleware as middleware;

/// Tool registry shared across the agent kernel and sub-agent scheduler.
#[cfg(feature = "tools")]
pub use deepagent_tools as tools;

/// Key-value storage: `Store` trait and `InMemoryStore`.
#[cfg(feature = "store")]
pub use deepagent_store as store;

/// `ScriptedChatModel`, `BoundToolsChatModel`, and other `ChatModel` test/wrapper utilities.
#[cfg(feature = "model-utils")]
pub use deepagent_models as models;

/// Procedural macros: `#[traceable]`.
#[cfg(feature = "macros")]
pub use deepagent_macros as macros;
#[cfg(feature = "macros")]
pub use deepagent_macros::*;

/// The deep agent harness: filesystem backends, subagents, skills, memory,
/// auto-summarization and human-in-the-loop review over [`graph`].
#[cfg(feature = "runtime")]
pub use deepagent_runtime as runtime;
