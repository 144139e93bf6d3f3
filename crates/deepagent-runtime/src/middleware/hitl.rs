use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use deepagent_middleware::{AgentMiddleware, ToolCallRequest, ToolCaller};
use serde_json::Value;

/// Which resolutions a given guarded tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Approve,
    Edit,
    Reject,
}

/// A reviewer's resolution for one pending tool call.
#[derive(Debug, Clone)]
pub enum Decision {
    Approve,
    Edit { arguments: Value },
    Reject { reason: Option<String> },
}

impl Decision {
    fn kind(&self) -> DecisionKind {
        match self {
            Decision::Approve => DecisionKind::Approve,
            Decision::Edit { .. } => DecisionKind::Edit,
            Decision::Reject { .. } => DecisionKind::Reject,
        }
    }
}

/// Per-tool HITL configuration: which decisions a reviewer may return for
/// calls to this tool. Defaults to all three.
#[derive(Debug, Clone)]
pub struct HitlToolConfig {
    pub allowed_decisions: Vec<DecisionKind>,
}

impl Default for HitlToolConfig {
    fn default() -> Self {
        Self { allowed_decisions: vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject] }
    }
}

/// A single guarded call surfaced to the reviewer.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Asked to resolve one guarded tool call. A real deployment backs this with
/// a human approval queue; tests back it with a scripted/always-approve
/// stand-in.
///
/// This resolves synchronously inside `wrap_tool_call` rather than
/// suspending the whole graph the way `DeepAgentError::Interrupted` /
/// `GraphResult::Interrupted` do for a true node-level pause — threading a
/// resume decision back through a plain `MessageState` would require
/// smuggling edited tool-call arguments back into the last AI message via
/// `update_state`, which isn't worth the machinery here. `ToolNode` already
/// executes calls one at a time, so a non-guarded call in the same batch
/// still runs immediately while a guarded one blocks on the provider,
/// matching the externally-visible behavior without a graph pause.
#[async_trait]
pub trait HitlDecisionProvider: Send + Sync {
    async fn decide(&self, request: &ActionRequest, config: &HitlToolConfig) -> Result<Decision, DeepAgentError>;
}

/// Always approves every guarded call. Useful as a default/test stand-in.
pub struct AlwaysApprove;

#[async_trait]
impl HitlDecisionProvider for AlwaysApprove {
    async fn decide(&self, _request: &ActionRequest, _config: &HitlToolConfig) -> Result<Decision, DeepAgentError> {
        Ok(Decision::Approve)
    }
}

/// Gates configured tool names behind a `HitlDecisionProvider`. Tools absent
/// from `interrupt_on` run unguarded.
pub struct HitlMiddleware {
    interrupt_on: HashMap<String, HitlToolConfig>,
    provider: Arc<dyn HitlDecisionProvider>,
}

impl HitlMiddleware {
    pub fn new(interrupt_on: HashMap<String, HitlToolConfig>, provider: Arc<dyn HitlDecisionProvider>) -> Self {
        Self { interrupt_on, provider }
    }
}

#[async_trait]
impl AgentMiddleware for HitlMiddleware {
    async fn wrap_tool_call(&self, request: ToolCallRequest, next: &dyn ToolCaller) -> Result<Value, DeepAgentError> {
        let Some(config) = self.interrupt_on.get(&request.call.name) else {
            return next.call(request).await;
        };

        let action_request =
            ActionRequest { tool_call_id: request.call.id.clone(), tool_name: request.call.name.clone(), arguments: request.call.arguments.clone() };

        let decision = self.provider.decide(&action_request, config).await?;
        if !config.allowed_decisions.contains(&decision.kind()) {
            return Err(DeepAgentError::Validation(format!(
                "tool '{}' does not allow the '{:?}' decision",
                request.call.name,
                decision.kind()
            )));
        }

        match decision {
            Decision::Approve => next.call(request).await,
            Decision::Edit { arguments } => {
                let mut edited = request;
                edited.call.arguments = arguments;
                next.call(edited).await
            }
            Decision::Reject { reason } => {
                let reason = reason.unwrap_or_else(|| "rejected by reviewer".to_string());
                Ok(Value::String(format!("Tool call '{}' was rejected: {reason}", action_request.tool_name)))
            }
        }
    }
}
