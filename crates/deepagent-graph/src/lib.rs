//! LangGraph-style state machine: `StateGraph`, `CompiledGraph`, a prebuilt
//! ReAct agent loop, and checkpointing for resumable/interruptible runs.

mod builder;
mod checkpoint;
mod command;
mod compiled;
mod edge;
mod node;
mod prebuilt;
mod state;
mod tool_node;

pub use builder::StateGraph;
pub use checkpoint::{Checkpoint, CheckpointConfig, Checkpointer, MemorySaver};
pub use command::{Command, CommandGoto, GraphResult, NodeOutput, Send};
pub use compiled::{CachePolicy, CompiledGraph, GraphEvent, GraphStream, MultiGraphEvent, MultiGraphStream, StreamMode};
pub use edge::{ConditionalEdge, Edge};
pub use node::Node;
pub use prebuilt::{
    create_agent, create_react_agent, create_react_agent_with_options, AgentOptions, PostModelHook, PreModelHook,
    ReactAgentOptions,
};
pub use state::{MessageState, State};
pub use tool_node::{tools_condition, ToolNode};

/// Sentinel name for the graph's implicit start point.
pub const START: &str = "__start__";
/// Sentinel name meaning "stop the graph".
pub const END: &str = "__end__";
