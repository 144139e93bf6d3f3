use serde_json::Value;

use crate::state::State;

/// A pending fan-out target: a node name plus the state it should receive.
/// Currently limited to sequential execution in `CompiledGraph` (full
/// parallel fan-out is future work, matching upstream's own TODO).
#[derive(Debug, Clone)]
pub struct Send<S> {
    pub node: String,
    pub state: S,
}

/// Where a `Command` should route execution next.
#[derive(Debug, Clone)]
pub enum CommandGoto<S> {
    One(String),
    Many(Vec<Send<S>>),
}

/// A node's structured instruction to the graph executor: apply a state
/// delta, optionally interrupt, optionally override routing.
///
/// `update` is a full `S`, not a partial map — state types encode "no
/// change" vs. "explicit clear" by wrapping ambiguous fields in `Option<T>`
/// and giving `merge` per-field reducer semantics (see `State::merge`).
pub struct Command<S: State> {
    pub update: Option<S>,
    pub goto: Option<CommandGoto<S>>,
    pub interrupt_value: Option<Value>,
}

impl<S: State> Command<S> {
    pub fn new() -> Self {
        Self {
            update: None,
            goto: None,
            interrupt_value: None,
        }
    }

    pub fn with_update(mut self, update: S) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_goto(mut self, target: impl Into<String>) -> Self {
        self.goto = Some(CommandGoto::One(target.into()));
        self
    }

    pub fn with_sends(mut self, sends: Vec<Send<S>>) -> Self {
        self.goto = Some(CommandGoto::Many(sends));
        self
    }

    pub fn with_interrupt(mut self, value: Value) -> Self {
        self.interrupt_value = Some(value);
        self
    }
}

impl<S: State> Default for Command<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> Clone for Command<S> {
    fn clone(&self) -> Self {
        Self {
            update: self.update.clone(),
            goto: self.goto.clone(),
            interrupt_value: self.interrupt_value.clone(),
        }
    }
}

impl<S: State> Clone for CommandGoto<S> {
    fn clone(&self) -> Self {
        match self {
            CommandGoto::One(s) => CommandGoto::One(s.clone()),
            CommandGoto::Many(sends) => CommandGoto::Many(sends.clone()),
        }
    }
}

/// What a node returns: either a plain new state (normal routing applies)
/// or a `Command` giving the executor explicit update/routing/interrupt
/// instructions.
pub enum NodeOutput<S: State> {
    State(S),
    Command(Command<S>),
}

impl<S: State> Clone for NodeOutput<S> {
    fn clone(&self) -> Self {
        match self {
            NodeOutput::State(s) => NodeOutput::State(s.clone()),
            NodeOutput::Command(c) => NodeOutput::Command(c.clone()),
        }
    }
}

impl<S: State> From<S> for NodeOutput<S> {
    fn from(state: S) -> Self {
        NodeOutput::State(state)
    }
}

impl<S: State> From<Command<S>> for NodeOutput<S> {
    fn from(command: Command<S>) -> Self {
        NodeOutput::Command(command)
    }
}

/// Outcome of a full graph run.
#[derive(Debug, Clone)]
pub enum GraphResult<S> {
    Complete(S),
    Interrupted { state: S, interrupt_value: Value },
}

impl<S> GraphResult<S> {
    /// Unwraps into the state regardless of completion vs. interruption,
    /// for callers (like the sub-agent scheduler) that only want the final
    /// snapshot and handle interrupts by bubbling them up separately.
    pub fn into_state(self) -> S {
        match self {
            GraphResult::Complete(s) => s,
            GraphResult::Interrupted { state, .. } => state,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, GraphResult::Interrupted { .. })
    }
}
