use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use deepagent_middleware::{AgentMiddleware, ModelRequest};
use tokio::sync::RwLock;

use crate::backend::Backend;

const DEFAULT_MAX_BODY_CHARS: usize = 4_000;
const TRUNCATION_NOTICE: &str = "...[truncated]";

/// A discovered skill with metadata parsed from its frontmatter.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub path: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    max_body_chars: Option<usize>,
}

fn parse_frontmatter(content: &str) -> (Frontmatter, &str) {
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some("---") {
        return (Frontmatter::default(), content);
    }

    let mut fm = Frontmatter::default();
    let mut consumed = "---\n".len();
    for line in content.lines().skip(1) {
        consumed += line.len() + 1;
        let trimmed = line.trim();
        if trimmed == "---" {
            let body = content.get(consumed.min(content.len())..).unwrap_or("").trim_start();
            return (fm, body);
        }
        if let Some(val) = trimmed.strip_prefix("name:") {
            fm.name = Some(unquote(val.trim()));
        } else if let Some(val) = trimmed.strip_prefix("description:") {
            fm.description = Some(unquote(val.trim()));
        } else if let Some(val) = trimmed.strip_prefix("max_body_chars:") {
            fm.max_body_chars = val.trim().parse().ok();
        }
    }
    (fm, "")
}

fn unquote(s: &str) -> String {
    s.trim_matches('"').trim_matches('\'').to_string()
}

fn truncate_body(body: &str, max_chars: usize) -> String {
    if body.len() <= max_chars {
        return body.to_string();
    }
    let mut cut = max_chars.min(body.len());
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &body[..cut], TRUNCATION_NOTICE)
}

/// Discovers `{source}/*/SKILL.md` files, parses their frontmatter, and
/// prepends a compact index plus truncated bodies to the system prompt.
/// Runs once per agent run, not once per model call — repeated source
/// enumeration every turn would be wasted backend I/O for data that never
/// changes mid-run.
pub struct SkillsMiddleware {
    backend: Arc<dyn Backend>,
    source_dirs: Vec<String>,
    default_max_body_chars: usize,
    discovered: Arc<RwLock<Vec<Skill>>>,
    loaded: AtomicBool,
}

impl SkillsMiddleware {
    pub fn new(backend: Arc<dyn Backend>, source_dirs: Vec<String>) -> Self {
        Self {
            backend,
            source_dirs,
            default_max_body_chars: DEFAULT_MAX_BODY_CHARS,
            discovered: Arc::new(RwLock::new(Vec::new())),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn with_default_max_body_chars(mut self, chars: usize) -> Self {
        self.default_max_body_chars = chars;
        self
    }

    async fn discover(&self) -> Vec<Skill> {
        let mut by_name: std::collections::BTreeMap<String, Skill> = std::collections::BTreeMap::new();

        for source in &self.source_dirs {
            let entries = match self.backend.ls_info(source).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            for entry in entries.into_iter().filter(|e| e.is_dir) {
                let dir_name = entry.path.trim_end_matches('/');
                let skill_path = format!("{source}/{dir_name}/SKILL.md");
                let Ok(data) = self.backend.read_raw(&skill_path).await else { continue };
                let content = data.text();
                let (fm, body) = parse_frontmatter(&content);
                let Some(name) = fm.name else { continue };
                let max_chars = fm.max_body_chars.unwrap_or(self.default_max_body_chars);
                by_name.insert(
                    name.clone(),
                    Skill {
                        name,
                        description: fm.description.unwrap_or_default(),
                        path: skill_path,
                        body: truncate_body(body, max_chars),
                    },
                );
            }
        }

        by_name.into_values().collect()
    }

    fn render(skills: &[Skill]) -> String {
        let mut section = String::from("\n<available_skills>\n");
        for skill in skills {
            section.push_str(&format!("- **{}**: {} (read `{}` for details)\n", skill.name, skill.description, skill.path));
        }
        section.push_str("</available_skills>\n");
        section
    }
}

#[async_trait]
impl AgentMiddleware for SkillsMiddleware {
    async fn before_model(&self, request: &mut ModelRequest) -> Result<(), DeepAgentError> {
        if !self.loaded.swap(true, Ordering::SeqCst) {
            let skills = self.discover().await;
            *self.discovered.write().await = skills;
        }

        let skills = self.discovered.read().await;
        if skills.is_empty() {
            return Ok(());
        }

        let section = Self::render(&skills);
        match &mut request.system_prompt {
            Some(prompt) => prompt.push_str(&section),
            None => request.system_prompt = Some(section),
        }
        Ok(())
    }
}
