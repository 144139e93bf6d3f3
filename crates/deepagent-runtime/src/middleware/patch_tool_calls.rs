use async_trait::async_trait;
use deepagent_core::{DeepAgentError, Message};
use deepagent_middleware::AgentMiddleware;

const CANCELLED_NOTICE: &str = "Tool call cancelled: no result was produced";

/// Guarantees invariant #1 (every tool call gets exactly one tool result):
/// scans the last assistant message's tool calls and synthesizes a
/// cancellation result for any id that never got one — e.g. an HITL
/// rejection that only covers a subset of a parallel batch, or a crashed
/// sub-agent whose result never made it back onto the transcript.
///
/// Always runs last in the middleware stack so every other middleware's
/// `after_agent` sweep (which may itself append messages) has already run.
pub struct PatchToolCallsMiddleware;

#[async_trait]
impl AgentMiddleware for PatchToolCallsMiddleware {
    async fn after_agent(&self, messages: &mut Vec<Message>) -> Result<(), DeepAgentError> {
        let Some(last_ai_index) = messages.iter().rposition(Message::is_ai) else { return Ok(()) };
        let expected_ids: Vec<String> = messages[last_ai_index].tool_calls().iter().map(|c| c.id.clone()).collect();
        if expected_ids.is_empty() {
            return Ok(());
        }

        let answered: std::collections::HashSet<&str> =
            messages[last_ai_index + 1..].iter().filter_map(Message::tool_call_id).collect();

        let missing: Vec<String> = expected_ids.into_iter().filter(|id| !answered.contains(id.as_str())).collect();
        for id in missing {
            messages.push(Message::tool(CANCELLED_NOTICE, id));
        }
        Ok(())
    }
}
