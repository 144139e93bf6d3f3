use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::{DeepAgentError, Tool, ToolDefinition};
use deepagent_middleware::AgentMiddleware;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

/// A single planning item. `id` is auto-assigned on first write if absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn priority(self) -> u8 {
        match self {
            TodoStatus::Pending => 0,
            TodoStatus::InProgress => 1,
            TodoStatus::Completed => 2,
        }
    }
}

/// Merges a `write_todos` update into the current list. An explicit empty
/// `update` clears the list. Otherwise existing todos keep their position
/// and are only overwritten when the update's status outranks the current
/// one; new todos are appended in update order. This is what makes N
/// sub-agents racing on stale snapshots converge instead of losing
/// completions (S2).
pub fn merge_todos(current: &mut Vec<Todo>, update: Vec<Todo>) {
    if update.is_empty() {
        current.clear();
        return;
    }

    for incoming in update {
        match current.iter_mut().find(|t| t.id == incoming.id) {
            Some(existing) if incoming.status.priority() > existing.status.priority() => {
                *existing = incoming;
            }
            Some(_) => {}
            None => current.push(incoming),
        }
    }
}

/// Provides the `write_todos` tool and owns the canonical todo list. The
/// list lives here (not threaded through graph state) since `MessageState`
/// is the only state type the graph engine carries — see DESIGN.md for why.
pub struct TodoMiddleware {
    todos: Arc<RwLock<Vec<Todo>>>,
}

impl TodoMiddleware {
    pub fn new() -> Self {
        Self { todos: Arc::new(RwLock::new(Vec::new())) }
    }

    pub async fn snapshot(&self) -> Vec<Todo> {
        self.todos.read().await.clone()
    }

    pub fn write_todos_tool(&self) -> Arc<dyn Tool> {
        Arc::new(WriteTodosTool { todos: self.todos.clone() })
    }
}

impl Default for TodoMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentMiddleware for TodoMiddleware {}

struct WriteTodosTool {
    todos: Arc<RwLock<Vec<Todo>>>,
}

#[derive(Deserialize)]
struct RawTodo {
    #[serde(default)]
    id: Option<String>,
    content: String,
    status: TodoStatus,
}

#[async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> &'static str {
        "write_todos"
    }

    fn description(&self) -> &'static str {
        "Replace or update the agent's todo list. Pass an empty list to clear it."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]}
                        },
                        "required": ["content", "status"]
                    }
                }
            },
            "required": ["todos"]
        }))
    }

    fn as_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().unwrap(),
        }
    }

    async fn call(&self, args: Value) -> Result<Value, DeepAgentError> {
        let raw: Vec<RawTodo> = serde_json::from_value(
            args.get("todos").cloned().ok_or_else(|| DeepAgentError::Validation("missing 'todos' field".into()))?,
        )
        .map_err(|e| DeepAgentError::Validation(format!("invalid todos: {e}")))?;

        let update: Vec<Todo> = raw
            .into_iter()
            .map(|t| {
                let mut status = t.status;
                if status == TodoStatus::Pending {
                    status = TodoStatus::InProgress;
                }
                Todo { id: t.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()), content: t.content, status }
            })
            .collect();

        let mut todos = self.todos.write().await;
        merge_todos(&mut todos, update);
        Ok(json!({"todos": *todos}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo(id: &str, status: TodoStatus) -> Todo {
        Todo { id: id.to_string(), content: id.to_string(), status }
    }

    #[test]
    fn monotonicity_higher_priority_wins() {
        let mut current = vec![todo("a", TodoStatus::InProgress)];
        merge_todos(&mut current, vec![todo("a", TodoStatus::Pending)]);
        assert_eq!(current[0].status, TodoStatus::InProgress, "a stale pending write must not regress completed/in_progress");

        merge_todos(&mut current, vec![todo("a", TodoStatus::Completed)]);
        assert_eq!(current[0].status, TodoStatus::Completed);
    }

    #[test]
    fn empty_update_clears() {
        let mut current = vec![todo("a", TodoStatus::Pending)];
        merge_todos(&mut current, vec![]);
        assert!(current.is_empty());
    }

    #[test]
    fn s2_parallel_stale_completions_all_converge() {
        let mut current = vec![
            todo("a", TodoStatus::InProgress),
            todo("b", TodoStatus::InProgress),
            todo("c", TodoStatus::InProgress),
        ];
        // Three stale updates arrive in order, each completing one entry but
        // still carrying the *initial* snapshot for the other two.
        merge_todos(&mut current, vec![todo("a", TodoStatus::Completed), todo("b", TodoStatus::InProgress), todo("c", TodoStatus::InProgress)]);
        merge_todos(&mut current, vec![todo("a", TodoStatus::InProgress), todo("b", TodoStatus::Completed), todo("c", TodoStatus::InProgress)]);
        merge_todos(&mut current, vec![todo("a", TodoStatus::InProgress), todo("b", TodoStatus::InProgress), todo("c", TodoStatus::Completed)]);

        assert!(current.iter().all(|t| t.status == TodoStatus::Completed));
    }

    #[test]
    fn new_todos_appended_in_update_order() {
        let mut current = vec![todo("a", TodoStatus::Pending)];
        merge_todos(&mut current, vec![todo("b", TodoStatus::Pending), todo("c", TodoStatus::Pending)]);
        let ids: Vec<_> = current.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn write_todos_tool_auto_assigns_id_and_upgrades_pending() {
        let mw = TodoMiddleware::new();
        let tool = mw.write_todos_tool();
        tool.call(json!({"todos": [{"content": "A", "status": "pending"}]})).await.unwrap();

        let snapshot = mw.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].id.is_empty());
        assert_eq!(snapshot[0].status, TodoStatus::InProgress);
    }

    #[tokio::test]
    async fn s1_serial_todo_flow() {
        let mw = TodoMiddleware::new();
        let tool = mw.write_todos_tool();
        tool.call(json!({"todos": [{"content": "A", "status": "pending"}]})).await.unwrap();
        let id = mw.snapshot().await[0].id.clone();

        tool.call(json!({"todos": [{"id": id, "content": "A", "status": "completed"}]})).await.unwrap();
        let snapshot = mw.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, TodoStatus::Completed);
    }
}
