//! File backend protocol: abstract `ls/read/write/edit/grep/glob` plus
//! optional `execute`/`upload_files`/`download_files`, implemented by
//! [`StateBackend`] (in-memory, checkpoint-friendly), [`FilesystemBackend`]
//! (host filesystem, sandboxed under a root) and [`SandboxBackend`]
//! (shell-command translation over a pluggable provider).

mod filesystem_backend;
mod sandbox;
mod state_backend;

pub use filesystem_backend::FilesystemBackend;
pub use sandbox::{SandboxBackend, SandboxInfo, SandboxList, SandboxOptions, SandboxProvider};
pub use state_backend::StateBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deepagent_core::DeepAgentError;
use serde::{Deserialize, Serialize};

/// A file's content and timestamps. Compared by `Arc` pointer identity
/// (see `deepagent_runtime::middleware::subagent::diff_by_reference`), not
/// by content equality — content compares would clobber parallel writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    pub content: Vec<String>,
    pub created_at: String,
    pub modified_at: String,
}

impl FileData {
    pub fn new(content: Vec<String>) -> Self {
        let now = deepagent_core::now_iso8601();
        Self {
            content,
            created_at: now.clone(),
            modified_at: now,
        }
    }

    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

/// A single entry in a directory listing. Directories carry a trailing `/`
/// in `path` and `is_dir = true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_dir: bool,
    pub size: Option<usize>,
    pub modified_at: Option<String>,
}

/// A single grep hit: 1-indexed line number and the matched line's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Result of an `execute` call against a sandbox-capable backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub output: String,
    pub exit_code: i32,
    pub truncated: bool,
}

/// Per-file outcome of a bulk upload. Partial success is mandatory: one bad
/// path in a batch of ten must not fail the other nine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResult {
    pub path: String,
    pub error: Option<String>,
}

/// Per-file outcome of a bulk download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDownloadResult {
    pub path: String,
    pub bytes: Option<Vec<u8>>,
    pub error: Option<String>,
}

/// Sentinel returned by `read` for a file that exists but has no content.
pub const EMPTY_FILE_NOTICE: &str = "System reminder: File exists but has empty contents";

fn not_found(path: &str) -> DeepAgentError {
    DeepAgentError::Backend(format!("File '{path}' not found"))
}

/// Shell-style glob match supporting `*` (no `/`), `**` (across `/`), `?`
/// and `[...]` character classes. Translates the pattern into a regex
/// rather than hand-rolling backtracking, matching how the rest of this
/// stack reaches for `regex` over bespoke matchers.
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut regex_src = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex_src.push_str(".*");
                } else {
                    regex_src.push_str("[^/]*");
                }
            }
            '?' => regex_src.push_str("[^/]"),
            '[' => {
                regex_src.push('[');
                for c2 in chars.by_ref() {
                    regex_src.push(c2);
                    if c2 == ']' {
                        break;
                    }
                }
            }
            c if ".+()|^$\\{}".contains(c) => {
                regex_src.push('\\');
                regex_src.push(c);
            }
            c => regex_src.push(c),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src).map(|re| re.is_match(candidate)).unwrap_or(false)
}

/// Abstract file operations consumed by the filesystem middleware and tools.
/// Implementations may be in-memory (checkpointed in graph state), a real
/// host directory, or a sandboxed shell.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Non-recursive listing; child directories collapse into one entry each
    /// with a trailing `/`. Non-existent directories yield an empty list,
    /// never an error.
    async fn ls_info(&self, path: &str) -> Result<Vec<FileInfo>, DeepAgentError>;

    /// Human-readable, line-numbered (`"%6d\t%s"`) slice of a file.
    /// `limit = 0` returns an empty string. Offsets are 0-indexed; the
    /// printed line numbers are 1-indexed.
    async fn read(&self, path: &str, offset: usize, limit: usize) -> Result<String, DeepAgentError> {
        let data = self.read_raw(path).await?;
        if data.content.is_empty() || (data.content.len() == 1 && data.content[0].is_empty()) {
            return Ok(EMPTY_FILE_NOTICE.to_string());
        }
        if limit == 0 {
            return Ok(String::new());
        }
        let lines = &data.content;
        let start = offset.min(lines.len());
        let end = (start + limit).min(lines.len());
        Ok(lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{}", start + i + 1, line))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Raw file contents and timestamps. Errors if the file does not exist.
    async fn read_raw(&self, path: &str) -> Result<Arc<FileData>, DeepAgentError>;

    /// Creates a new file. Fails if one already exists at `path`.
    async fn write(&self, path: &str, content: &str) -> Result<(), DeepAgentError>;

    /// Replaces `old` with `new` in the file at `path`, returning the
    /// occurrence count. Fails if `old` isn't found, or matches more than
    /// once without `replace_all`. An empty `old` against an empty file sets
    /// the initial content (0 occurrences); against a non-empty file it
    /// errors.
    async fn edit(&self, path: &str, old: &str, new: &str, replace_all: bool) -> Result<usize, DeepAgentError>;

    /// Literal substring search (not regex) across files under `path`,
    /// optionally filtered by a shell-style glob. Results are sorted by
    /// path then line.
    async fn grep_raw(&self, pattern: &str, path: Option<&str>, glob: Option<&str>) -> Result<Vec<GrepMatch>, DeepAgentError>;

    /// Glob matching with `*` (no `/`), `**` (across `/`), `?`, `[...]`.
    async fn glob_info(&self, pattern: &str, path: Option<&str>) -> Result<Vec<FileInfo>, DeepAgentError>;

    /// Bulk upload. Default: unsupported.
    async fn upload_files(&self, _files: Vec<(String, Vec<u8>)>) -> Result<Vec<FileUploadResult>, DeepAgentError> {
        Err(DeepAgentError::Backend("upload_files not supported by this backend".into()))
    }

    /// Bulk download. Default: unsupported.
    async fn download_files(&self, _paths: Vec<String>) -> Result<Vec<FileDownloadResult>, DeepAgentError> {
        Err(DeepAgentError::Backend("download_files not supported by this backend".into()))
    }

    /// Whether this backend can execute shell commands.
    fn supports_execution(&self) -> bool {
        false
    }

    /// Runs a shell command. Only sandbox-capable backends override this.
    async fn execute(&self, _command: &str, _timeout: Option<Duration>) -> Result<ExecuteResult, DeepAgentError> {
        Err(DeepAgentError::Backend("execute not supported by this backend".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_default_impl_formats_line_numbers() {
        let backend = StateBackend::new();
        backend.write("/notes.txt", "hello world").await.unwrap();
        let out = backend.read("/notes.txt", 0, 500).await.unwrap();
        assert_eq!(out, "     1\thello world");
    }

    #[tokio::test]
    async fn read_empty_file_returns_sentinel() {
        let backend = StateBackend::new();
        backend.write("/empty.txt", "").await.unwrap();
        let out = backend.read("/empty.txt", 0, 500).await.unwrap();
        assert_eq!(out, EMPTY_FILE_NOTICE);
    }

    #[tokio::test]
    async fn read_limit_zero_returns_empty_string() {
        let backend = StateBackend::new();
        backend.write("/notes.txt", "a\nb\nc").await.unwrap();
        let out = backend.read("/notes.txt", 0, 0).await.unwrap();
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn read_missing_file_errors() {
        let backend = StateBackend::new();
        let err = backend.read("/missing.txt", 0, 10).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
