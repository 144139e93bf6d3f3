use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;

use super::{not_found, Backend, FileData, FileInfo, GrepMatch};

/// Host-filesystem backend, rooted at a directory. Paths beginning with `/`
/// are sandboxed under the root (virtual mode); `..` traversal and symlinks
/// escaping the root are rejected by comparing canonicalized paths.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, DeepAgentError> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.split('/').any(|seg| seg == "..") {
            return Err(DeepAgentError::Backend(format!("path '{path}' escapes the backend root")));
        }
        Ok(self.root.join(trimmed))
    }

    async fn check_containment(&self, full: &Path) -> Result<(), DeepAgentError> {
        let Ok(root_real) = tokio::fs::canonicalize(&self.root).await else {
            return Ok(());
        };
        if let Ok(target_real) = tokio::fs::canonicalize(full).await {
            if !target_real.starts_with(&root_real) {
                return Err(DeepAgentError::Backend("path escapes the backend root via symlink".into()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FilesystemBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, DeepAgentError> {
        let full = self.resolve(path)?;
        let mut read_dir = match tokio::fs::read_dir(&full).await {
            Ok(rd) => rd,
            Err(_) => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| DeepAgentError::Backend(e.to_string()))? {
            let meta = entry.metadata().await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if meta.is_dir() {
                entries.push(FileInfo {
                    path: format!("{name}/"),
                    is_dir: true,
                    size: None,
                    modified_at: None,
                });
            } else {
                let modified = meta.modified().ok().map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());
                entries.push(FileInfo {
                    path: name,
                    is_dir: false,
                    size: Some(meta.len() as usize),
                    modified_at: modified,
                });
            }
        }
        entries.sort_by(|a, b| a.path.trim_end_matches('/').cmp(b.path.trim_end_matches('/')));
        Ok(entries)
    }

    async fn read_raw(&self, path: &str) -> Result<Arc<FileData>, DeepAgentError> {
        let full = self.resolve(path)?;
        self.check_containment(&full).await?;
        let bytes = tokio::fs::read(&full).await.map_err(|_| not_found(path))?;
        let text = String::from_utf8_lossy(&bytes).to_string();
        let content = if text.is_empty() { vec![String::new()] } else { text.split('\n').map(str::to_string).collect() };
        let meta = tokio::fs::metadata(&full).await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
        let modified = meta
            .modified()
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339())
            .unwrap_or_else(deepagent_core::now_iso8601);
        Ok(Arc::new(FileData {
            content,
            created_at: modified.clone(),
            modified_at: modified,
        }))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), DeepAgentError> {
        let full = self.resolve(path)?;
        if tokio::fs::metadata(&full).await.is_ok() {
            return Err(DeepAgentError::Backend(format!("File '{path}' already exists")));
        }
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
        }
        tokio::fs::write(&full, content).await.map_err(|e| DeepAgentError::Backend(e.to_string()))
    }

    async fn edit(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<usize, DeepAgentError> {
        let data = self.read_raw(path).await?;
        let text = data.text();

        if old.is_empty() {
            if text.is_empty() {
                let full = self.resolve(path)?;
                tokio::fs::write(&full, new).await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
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

        let replaced = if replace_all { text.replace(old, new) } else { text.replacen(old, new, 1) };
        let full = self.resolve(path)?;
        tokio::fs::write(&full, replaced).await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
        Ok(occurrences)
    }

    async fn grep_raw(&self, pattern: &str, path: Option<&str>, glob: Option<&str>) -> Result<Vec<GrepMatch>, DeepAgentError> {
        let base = path.unwrap_or(".");
        let mut matches = Vec::new();
        let mut stack = vec![self.resolve(base)?];

        while let Some(dir) = stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(entry) = read_dir.next_entry().await.map_err(|e| DeepAgentError::Backend(e.to_string()))? {
                let full = entry.path();
                let meta = entry.metadata().await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
                if meta.is_dir() {
                    stack.push(full);
                    continue;
                }
                let rel = full.strip_prefix(&self.root).unwrap_or(&full).to_string_lossy().replace('\\', "/");
                if let Some(glob) = glob {
                    if !super::glob_match(glob, &rel) {
                        continue;
                    }
                }
                let Ok(bytes) = tokio::fs::read(&full).await else { continue };
                let text = String::from_utf8_lossy(&bytes);
                for (i, line) in text.split('\n').enumerate() {
                    if line.contains(pattern) {
                        matches.push(GrepMatch { path: rel.clone(), line: i + 1, text: line.to_string() });
                    }
                }
            }
        }

        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }

    async fn glob_info(&self, pattern: &str, path: Option<&str>) -> Result<Vec<FileInfo>, DeepAgentError> {
        let base = self.resolve(path.unwrap_or("."))?;
        let mut entries = Vec::new();
        let mut stack = vec![base];

        while let Some(dir) = stack.pop() {
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Some(entry) = read_dir.next_entry().await.map_err(|e| DeepAgentError::Backend(e.to_string()))? {
                let full = entry.path();
                let meta = entry.metadata().await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
                if meta.is_dir() {
                    stack.push(full);
                    continue;
                }
                let rel = full.strip_prefix(&self.root).unwrap_or(&full).to_string_lossy().replace('\\', "/");
                if super::glob_match(pattern, &rel) {
                    entries.push(FileInfo {
                        path: rel,
                        is_dir: false,
                        size: Some(meta.len() as usize),
                        modified_at: None,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn supports_execution(&self) -> bool {
        true
    }

    async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<super::ExecuteResult, DeepAgentError> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);

        let run = async {
            let output = cmd.output().await.map_err(|e| DeepAgentError::Backend(e.to_string()))?;
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            Ok::<_, DeepAgentError>(super::ExecuteResult {
                output: combined,
                exit_code: output.status.code().unwrap_or(-1),
                truncated: false,
            })
        };

        match timeout {
            Some(d) => match tokio::time::timeout(d, run).await {
                Ok(result) => result,
                Err(_) => Ok(super::ExecuteResult {
                    output: "command timed out".to_string(),
                    exit_code: 124,
                    truncated: false,
                }),
            },
            None => run.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_backend() -> (FilesystemBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FilesystemBackend::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn write_read_edit_roundtrip() {
        let (backend, _dir) = temp_backend().await;
        backend.write("/notes.txt", "hello world").await.unwrap();
        assert_eq!(backend.read("/notes.txt", 0, 10).await.unwrap(), "     1\thello world");
        backend.edit("/notes.txt", "hello", "hi", false).await.unwrap();
        assert_eq!(backend.read("/notes.txt", 0, 10).await.unwrap(), "     1\thi world");
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let (backend, _dir) = temp_backend().await;
        let err = backend.read_raw("/../etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("escapes"));
    }

    #[tokio::test]
    async fn ls_nonexistent_directory_is_empty() {
        let (backend, _dir) = temp_backend().await;
        assert!(backend.ls_info("/nope").await.unwrap().is_empty());
    }
}
