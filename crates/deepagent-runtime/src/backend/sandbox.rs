use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Backend, ExecuteResult, FileData, FileDownloadResult, FileInfo, FileUploadResult, GrepMatch};

/// Options for listing/creating a sandbox instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxOptions {
    pub sandbox_id: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxList {
    pub items: Vec<SandboxInfo>,
    pub cursor: Option<String>,
}

/// Provider of concrete sandbox instances (Deno, WASIX, LangSmith Sandbox,
/// local shell, ...). This crate only fixes the protocol; a provider only
/// needs to implement process execution and bulk file transfer — the
/// `find`/`stat`/`awk`/`grep`-based file ops are supplied by
/// [`SandboxBackend`] itself via `execute`.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn list(&self, options: Option<SandboxOptions>) -> Result<SandboxList, DeepAgentError>;
    async fn get_or_create(&self, options: Option<SandboxOptions>) -> Result<Arc<SandboxBackend>, DeepAgentError>;
    async fn delete(&self, sandbox_id: &str) -> Result<(), DeepAgentError>;
}

/// A backend whose file operations are shell commands dispatched through a
/// provider-supplied `execute`. Providers implement `run_raw`; this struct
/// translates `ls`/`read`/`write`/`edit`/`grep`/`glob` into POSIX shell
/// recipes so a provider only has to run commands and move bytes.
pub struct SandboxBackend {
    id: String,
    runner: Arc<dyn SandboxRunner>,
}

/// What a concrete sandbox provider actually has to implement: run a shell
/// command and move bytes in/out. Everything else is derived.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Option<Duration>) -> Result<ExecuteResult, DeepAgentError>;
    async fn upload(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<FileUploadResult>, DeepAgentError>;
    async fn download(&self, paths: Vec<String>) -> Result<Vec<FileDownloadResult>, DeepAgentError>;
}

impl SandboxBackend {
    pub fn new(id: impl Into<String>, runner: Arc<dyn SandboxRunner>) -> Self {
        Self { id: id.into(), runner }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, command: &str) -> Result<String, DeepAgentError> {
        let result = self.runner.run(command, None).await?;
        if result.exit_code != 0 {
            return Err(DeepAgentError::Backend(format!("command failed ({}): {}", result.exit_code, result.output)));
        }
        Ok(result.output)
    }
}

#[async_trait]
impl Backend for SandboxBackend {
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, DeepAgentError> {
        // find <path> -maxdepth 1 -mindepth 1 -printf '%y\t%f\n'
        let cmd = format!("find {path:?} -maxdepth 1 -mindepth 1 -printf '%y\\t%f\\n' 2>/dev/null || true");
        let output = self.runner.run(&cmd, None).await?.output;
        let mut entries: Vec<FileInfo> = output
            .lines()
            .filter_map(|line| {
                let (kind, name) = line.split_once('\t')?;
                Some(FileInfo {
                    path: if kind == "d" { format!("{name}/") } else { name.to_string() },
                    is_dir: kind == "d",
                    size: None,
                    modified_at: None,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.path.trim_end_matches('/').cmp(b.path.trim_end_matches('/')));
        Ok(entries)
    }

    async fn read_raw(&self, path: &str) -> Result<Arc<FileData>, DeepAgentError> {
        let downloaded = self.runner.download(vec![path.to_string()]).await?;
        let result = downloaded.into_iter().next().ok_or_else(|| DeepAgentError::Backend("empty download result".into()))?;
        if let Some(err) = result.error {
            return Err(DeepAgentError::Backend(format!("File '{path}' not found: {err}")));
        }
        let bytes = result.bytes.unwrap_or_default();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let content = if text.is_empty() { vec![String::new()] } else { text.split('\n').map(str::to_string).collect() };
        Ok(Arc::new(FileData::new(content)))
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), DeepAgentError> {
        let check = format!("test -e {path:?} && echo exists || true");
        if self.run(&check).await?.trim() == "exists" {
            return Err(DeepAgentError::Backend(format!("File '{path}' already exists")));
        }
        let results = self.runner.upload(vec![(path.to_string(), content.as_bytes().to_vec())]).await?;
        match results.into_iter().next() {
            Some(FileUploadResult { error: Some(e), .. }) => Err(DeepAgentError::Backend(e)),
            _ => Ok(()),
        }
    }

    async fn edit(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<usize, DeepAgentError> {
        let data = self.read_raw(path).await?;
        let text = data.text();

        if old.is_empty() {
            if text.is_empty() {
                self.runner.upload(vec![(path.to_string(), new.as_bytes().to_vec())]).await?;
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
        self.runner.upload(vec![(path.to_string(), replaced.into_bytes())]).await?;
        Ok(occurrences)
    }

    async fn grep_raw(&self, pattern: &str, path: Option<&str>, glob: Option<&str>) -> Result<Vec<GrepMatch>, DeepAgentError> {
        let base = path.unwrap_or(".");
        let name_filter = glob.map(|g| format!(" -name {g:?}")).unwrap_or_default();
        let cmd = format!("grep -rn -F {pattern:?} {base:?}{name_filter} 2>/dev/null || true");
        let output = self.runner.run(&cmd, None).await?.output;
        let mut matches: Vec<GrepMatch> = output
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, ':');
                let path = parts.next()?.to_string();
                let line_no: usize = parts.next()?.parse().ok()?;
                let text = parts.next()?.to_string();
                Some(GrepMatch { path, line: line_no, text })
            })
            .collect();
        matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));
        Ok(matches)
    }

    async fn glob_info(&self, pattern: &str, path: Option<&str>) -> Result<Vec<FileInfo>, DeepAgentError> {
        let base = path.unwrap_or(".");
        let cmd = format!("find {base:?} -type f -name {pattern:?} 2>/dev/null || true");
        let output = self.runner.run(&cmd, None).await?.output;
        Ok(output
            .lines()
            .map(|p| FileInfo { path: p.to_string(), is_dir: false, size: None, modified_at: None })
            .collect())
    }

    async fn upload_files(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<FileUploadResult>, DeepAgentError> {
        self.runner.upload(files).await
    }

    async fn download_files(&self, paths: Vec<String>) -> Result<Vec<FileDownloadResult>, DeepAgentError> {
        self.runner.download(paths).await
    }

    fn supports_execution(&self) -> bool {
        true
    }

    async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<ExecuteResult, DeepAgentError> {
        self.runner.run(command, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A runner backed by an in-process directory, used to exercise the
    /// shell-recipe translation without a real sandbox provider.
    struct FakeRunner {
        files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SandboxRunner for FakeRunner {
        async fn run(&self, _command: &str, _timeout: Option<Duration>) -> Result<ExecuteResult, DeepAgentError> {
            Ok(ExecuteResult { output: String::new(), exit_code: 0, truncated: false })
        }

        async fn upload(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<FileUploadResult>, DeepAgentError> {
            let mut store = self.files.lock().unwrap();
            Ok(files
                .into_iter()
                .map(|(path, bytes)| {
                    store.insert(path.clone(), bytes);
                    FileUploadResult { path, error: None }
                })
                .collect())
        }

        async fn download(&self, paths: Vec<String>) -> Result<Vec<FileDownloadResult>, DeepAgentError> {
            let store = self.files.lock().unwrap();
            Ok(paths
                .into_iter()
                .map(|path| match store.get(&path) {
                    Some(bytes) => FileDownloadResult { path, bytes: Some(bytes.clone()), error: None },
                    None => FileDownloadResult { path, bytes: None, error: Some("not found".into()) },
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn write_then_read_raw_round_trips_through_upload_download() {
        let runner = Arc::new(FakeRunner { files: Mutex::new(Default::default()) });
        let backend = SandboxBackend::new("sbx_1", runner);
        backend.write("/a.txt", "hello").await.unwrap();
        let data = backend.read_raw("/a.txt").await.unwrap();
        assert_eq!(data.text(), "hello");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let runner = Arc::new(FakeRunner { files: Mutex::new(Default::default()) });
        let backend = SandboxBackend::new("sbx_1", runner);
        assert!(backend.read_raw("/missing.txt").await.is_err());
    }
}
