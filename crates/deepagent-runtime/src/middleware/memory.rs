use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use deepagent_middleware::{AgentMiddleware, ModelRequest};
use tokio::sync::RwLock;

use crate::backend::Backend;

/// Loads AGENTS.md-style memory files and prepends their content to the
/// system prompt. Reads each configured path in order; later paths are
/// rendered after earlier ones, so they read as the more authoritative
/// guidance when their content overlaps. Missing files are skipped.
pub struct MemoryMiddleware {
    backend: Arc<dyn Backend>,
    memory_files: Vec<String>,
    loaded: AtomicBool,
    rendered: Arc<RwLock<Option<String>>>,
}

impl MemoryMiddleware {
    pub fn new(backend: Arc<dyn Backend>, memory_files: Vec<String>) -> Self {
        Self { backend, memory_files, loaded: AtomicBool::new(false), rendered: Arc::new(RwLock::new(None)) }
    }

    async fn load(&self) -> Option<String> {
        let mut sections = Vec::new();
        for path in &self.memory_files {
            if let Ok(data) = self.backend.read_raw(path).await {
                let text = data.text();
                if !text.trim().is_empty() {
                    sections.push(text);
                }
            }
        }
        if sections.is_empty() {
            None
        } else {
            Some(format!("\n<memory>\n{}\n</memory>\n", sections.join("\n\n---\n\n")))
        }
    }
}

#[async_trait]
impl AgentMiddleware for MemoryMiddleware {
    async fn before_model(&self, request: &mut ModelRequest) -> Result<(), DeepAgentError> {
        if !self.loaded.swap(true, Ordering::SeqCst) {
            let rendered = self.load().await;
            *self.rendered.write().await = rendered;
        }

        let rendered = self.rendered.read().await;
        let Some(section) = rendered.as_ref() else { return Ok(()) };

        match &mut request.system_prompt {
            Some(prompt) => prompt.push_str(section),
            None => request.system_prompt = Some(section.clone()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StateBackend;

    #[tokio::test]
    async fn injects_memory_once_and_caches() {
        let backend = Arc::new(StateBackend::new());
        backend.write("/AGENTS.md", "Use tabs.").await.unwrap();

        let mw = MemoryMiddleware::new(backend.clone(), vec!["/AGENTS.md".to_string()]);
        let mut request = ModelRequest { messages: vec![], tools: vec![], tool_choice: None, system_prompt: None };
        mw.before_model(&mut request).await.unwrap();
        assert!(request.system_prompt.as_ref().unwrap().contains("Use tabs."));

        backend.write("/other.md", "ignored, not re-scanned after first load").await.unwrap();
        let mut request2 = ModelRequest { messages: vec![], tools: vec![], tool_choice: None, system_prompt: None };
        mw.before_model(&mut request2).await.unwrap();
        assert!(!request2.system_prompt.as_ref().unwrap().contains("ignored"));
    }

    #[tokio::test]
    async fn missing_files_are_skipped_without_error() {
        let backend = Arc::new(StateBackend::new());
        let mw = MemoryMiddleware::new(backend, vec!["/missing.md".to_string()]);
        let mut request = ModelRequest { messages: vec![], tools: vec![], tool_choice: None, system_prompt: None };
        mw.before_model(&mut request).await.unwrap();
        assert!(request.system_prompt.is_none());
    }

    #[tokio::test]
    async fn later_sources_appear_after_earlier_ones() {
        let backend = Arc::new(StateBackend::new());
        backend.write("/global.md", "global guidance").await.unwrap();
        backend.write("/project.md", "project guidance").await.unwrap();

        let mw = MemoryMiddleware::new(backend, vec!["/global.md".to_string(), "/project.md".to_string()]);
        let mut request = ModelRequest { messages: vec![], tools: vec![], tool_choice: None, system_prompt: None };
        mw.before_model(&mut request).await.unwrap();
        let prompt = request.system_prompt.unwrap();
        assert!(prompt.find("global guidance").unwrap() < prompt.find("project guidance").unwrap());
    }
}
