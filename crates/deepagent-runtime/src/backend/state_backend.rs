use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use tokio::sync::RwLock;

use super::{not_found, Backend, FileData, FileInfo, GrepMatch};

/// In-memory backend. Each write replaces the `Arc<FileData>` at a path
/// rather than mutating it in place, so reference-identity diffing (used by
/// the subagent middleware to detect which files a concurrent execution
/// touched) stays correct.
#[derive(Default)]
pub struct StateBackend {
    files: RwLock<HashMap<String, Arc<FileData>>>,
}

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

impl StateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current file map, keyed by normalized path.
    pub async fn snapshot(&self) -> HashMap<String, Arc<FileData>> {
        self.files.read().await.clone()
    }
}

#[async_trait]
impl Backend for StateBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, DeepAgentError> {
        let prefix = normalize(path);
        let prefix = if prefix.is_empty() || prefix == "." {
            String::new()
        } else {
            format!("{prefix}/")
        };

        let files = self.files.read().await;
        let mut dirs = std::collections::BTreeSet::new();
        let mut entries = Vec::new();

        for (file_path, data) in files.iter() {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                None => entries.push(FileInfo {
                    path: rest.to_string(),
                    is_dir: false,
                    size: Some(data.text().len()),
                    modified_at: Some(data.modified_at.clone()),
                }),
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
            }
        }

        for dir in dirs {
            entries.push(FileInfo {
                path: format!("{dir}/"),
                is_dir: true,
                size: None,
                modified_at: None,
            });
        }

        entries.sort_by(|a, b| a.path.trim_end_matches('/').cmp(b.path.trim_end_matches('/')));
        Ok(entries)
    }

    async fn read_raw(&self, path: &str) -> Result<Arc<FileData>, DeepAgentError> {
        let key = normalize(path);
        self.files.read().await.get(&key).cloned().ok_or_else(|| not_found(path))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), DeepAgentError> {
        let key = normalize(path);
        let mut files = self.files.write().await;
        if files.contains_key(&key) {
            return Err(DeepAgentError::Backend(format!("File '{path}' already exists")));
        }
        let lines = if content.is_empty() {
            vec![String::new()]
        } else {
            content.split('\n').map(str::to_string).collect()
        };
        files.insert(key, Arc::new(FileData::new(lines)));
        Ok(())
    }

    async fn edit(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<usize, DeepAgentError> {
        let key = normalize(path);
        let mut files = self.files.write().await;
        let current = files.get(&key).cloned().ok_or_else(|| not_found(path))?;
        let text = current.text();

        if old.is_empty() {
            if text.is_empty() {
                files.insert(key, Arc::new(FileData::new(new.split('\n').map(str::to_string).collect())));
                return Ok(0);
            }
            return Err(DeepAgentError::Backend("cannot replace empty string in a non-empty file".into()));
        }

        let occurrences = text.matches(old).count();
        if occurrences == 0 {
            return Err(DeepAgentError::Backend(format!("string '{old}' not found in '{path}'")));
        }
        if occurrences > 1 && !replace_all {
            return Err(DeepAgentError::Backend(format!(
                "string '{old}' appears {occurrences} times in '{path}'; pass replace_all to replace all"
            )));
        }

        let replaced = if replace_all {
            text.replace(old, new)
        } else {
            text.replacen(old, new, 1)
        };
        files.insert(key, Arc::new(FileData::new(replaced.split('\n').map(str::to_string).collect())));
        Ok(occurrences)
    }

    async fn grep_raw(&self, pattern: &str, path: Option<&str>, glob: Option<&str>) -> Result<Vec<GrepMatch>, DeepAgentError> {
        let prefix = path.map(normalize).unwrap_or_default();
        let files = self.files.read().await;
        let mut matches = Vec::new();

        for (file_path, data) in files.iter() {
            if !prefix.is_empty() && !file_path.starts_with(&prefix) {
                continue;
            }
            if let Some(glob) = glob {
                if !super::glob_match(glob, file_path) {
                    continue;
                }
            }
            for (i, line) in data.content.iter().enumerate() {
                if line.contains(pattern) {
                    matches.push(GrepMatch {
                        path: file_path.clone(),
                        line: i + 1,
                        text: line.clone(),
                    });
                }
            }
        }

        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }

    async fn glob_info(&self, pattern: &str, path: Option<&str>) -> Result<Vec<FileInfo>, DeepAgentError> {
        let prefix = path.map(normalize).unwrap_or_default();
        let files = self.files.read().await;
        let mut entries = Vec::new();

        for (file_path, data) in files.iter() {
            let candidate = if prefix.is_empty() {
                file_path.as_str()
            } else if let Some(rest) = file_path.strip_prefix(&format!("{prefix}/")) {
                rest
            } else {
                continue;
            };
            if super::glob_match(pattern, candidate) {
                entries.push(FileInfo {
                    path: file_path.clone(),
                    is_dir: false,
                    size: Some(data.text().len()),
                    modified_at: Some(data.modified_at.clone()),
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}
