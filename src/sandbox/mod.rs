//! Remote execution environments.
//!
//! Tools never touch the local machine: every file, git and process operation
//! is forwarded to a remote sandbox through the [`Sandbox`] trait. One sandbox
//! is created per task id by a [`SandboxProvider`] and tracked by the
//! [`SandboxManager`].

mod daytona;
mod manager;

pub use daytona::{wait_until_started, DaytonaConfig, DaytonaProvider, GitCredentials};
pub use manager::SandboxManager;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Directory inside the sandbox that the task repository is cloned into.
pub const REPO_DIR: &str = "workspace/repo";

/// Shared reference to a live sandbox.
pub type SandboxHandle = Arc<dyn Sandbox>;

/// Errors from the remote sandbox service.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Sandbox API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid sandbox response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Operation(String),
}

/// Lifecycle state reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Started,
    Starting,
    Stopped,
    Stopping,
    Error,
    Unknown,
}

impl SandboxState {
    /// Parse the provider's state string; unrecognised values map to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "creating" | "pending_build" | "building_snapshot" | "pulling_snapshot" => {
                Self::Creating
            }
            "started" => Self::Started,
            "starting" | "restoring" => Self::Starting,
            "stopped" | "archived" => Self::Stopped,
            "stopping" | "archiving" => Self::Stopping,
            "error" | "build_failed" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started)
    }
}

/// Runtime flavour the sandbox image is built for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    Typescript,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Typescript => "typescript",
            Self::Javascript => "javascript",
        }
    }

    /// Parse a language name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "python" => Some(Self::Python),
            "typescript" => Some(Self::Typescript),
            "javascript" => Some(Self::Javascript),
            _ => None,
        }
    }
}

/// What a newly created sandbox should contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Repository to clone into [`REPO_DIR`].
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub language: Language,
}

impl EnvironmentSpec {
    pub fn for_repository(url: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            repository_url: Some(url.into()),
            branch,
            language: Language::default(),
        }
    }
}

/// An entry returned by a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(default)]
    pub modified: Option<String>,
}

/// A single text-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub file: String,
    pub line: u64,
    pub content: String,
}

/// Repository status as reported by the sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitStatus {
    pub current_branch: String,
    pub ahead: u64,
    pub behind: u64,
    pub modified_files: Vec<String>,
}

/// Output of a process or code execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub exit_code: i64,
    pub result: String,
}

impl ExecResponse {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Capability surface of one remote environment.
///
/// Paths are interpreted by the sandbox relative to its home directory.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Provider-assigned identifier.
    fn id(&self) -> &str;

    /// Fetch the current lifecycle state from the provider.
    async fn state(&self) -> Result<SandboxState, SandboxError>;

    async fn start(&self) -> Result<(), SandboxError>;

    async fn stop(&self) -> Result<(), SandboxError>;

    async fn delete(&self) -> Result<(), SandboxError>;

    // Filesystem

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError>;

    async fn find_files(&self, path: &str, pattern: &str)
        -> Result<Vec<SearchMatch>, SandboxError>;

    async fn replace_in_files(
        &self,
        files: &[String],
        pattern: &str,
        new_value: &str,
    ) -> Result<(), SandboxError>;

    async fn upload_file(&self, path: &str, content: Vec<u8>) -> Result<(), SandboxError>;

    async fn delete_file(&self, path: &str) -> Result<(), SandboxError>;

    // Git

    async fn git_status(&self, path: &str) -> Result<GitStatus, SandboxError>;

    async fn git_branches(&self, path: &str) -> Result<Vec<String>, SandboxError>;

    async fn git_create_branch(&self, path: &str, name: &str) -> Result<(), SandboxError>;

    async fn git_checkout_branch(&self, path: &str, name: &str) -> Result<(), SandboxError>;

    async fn git_add(&self, path: &str, files: &[String]) -> Result<(), SandboxError>;

    async fn git_commit(
        &self,
        path: &str,
        message: &str,
        author: &str,
        email: &str,
    ) -> Result<(), SandboxError>;

    async fn git_push(&self, path: &str) -> Result<(), SandboxError>;

    async fn git_pull(&self, path: &str) -> Result<(), SandboxError>;

    async fn git_clone(
        &self,
        url: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<(), SandboxError>;

    // Processes

    async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError>;

    async fn code_run(
        &self,
        code: &str,
        language: Language,
        timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError>;
}

/// Creates remote environments.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a sandbox called `name` and prepare it according to `spec`
    /// (including cloning the repository, if any).
    async fn create(
        &self,
        name: &str,
        spec: &EnvironmentSpec,
    ) -> Result<SandboxHandle, SandboxError>;
}
