use async_trait::async_trait;
use deepagent_core::{ChatModel, ChatRequest, ChatResponse, DeepAgentError};
use tokio::sync::Mutex;

/// A `ChatModel` that replays a fixed script of responses, one per call.
/// The last response is repeated once the script is exhausted, so agent
/// loops that run one step past what the test explicitly scripted don't
/// panic on an out-of-bounds index.
pub struct ScriptedChatModel {
    responses: Vec<ChatResponse>,
    cursor: Mutex<usize>,
}

impl ScriptedChatModel {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        assert!(!responses.is_empty(), "ScriptedChatModel needs at least one response");
        Self {
            responses,
            cursor: Mutex::new(0),
        }
    }

    /// Number of calls made so far against this model.
    pub async fn call_count(&self) -> usize {
        *self.cursor.lock().await
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, DeepAgentError> {
        let mut cursor = self.cursor.lock().await;
        let index = (*cursor).min(self.responses.len() - 1);
        *cursor += 1;
        Ok(self.responses[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepagent_core::Message;

    #[tokio::test]
    async fn replays_script_in_order() {
        let model = ScriptedChatModel::new(vec![
            ChatResponse { message: Message::ai("first"), usage: None },
            ChatResponse { message: Message::ai("second"), usage: None },
        ]);
        let req = ChatRequest::new(vec![Message::human("hi")]);
        assert_eq!(model.chat(req.clone()).await.unwrap().message.content(), "first");
        assert_eq!(model.chat(req).await.unwrap().message.content(), "second");
    }

    #[tokio::test]
    async fn repeats_last_response_past_end_of_script() {
        let model = ScriptedChatModel::new(vec![ChatResponse { message: Message::ai("only"), usage: None }]);
        let req = ChatRequest::new(vec![Message::human("hi")]);
        model.chat(req.clone()).await.unwrap();
        model.chat(req.clone()).await.unwrap();
        let resp = model.chat(req).await.unwrap();
        assert_eq!(resp.message.content(), "only");
        assert_eq!(model.call_count().await, 3);
    }
}
