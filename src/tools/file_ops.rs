//! File operation tools backed by the sandbox filesystem.
//!
//! Relative paths resolve into the repository checkout:
//! - `src/main.rs` → `workspace/repo/src/main.rs`
//! - `/tmp/out.txt` → used as-is

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, resolve_repo_path, Tool, ToolResult};
use crate::sandbox::{SandboxHandle, REPO_DIR};

fn default_repo_dir() -> String {
    REPO_DIR.to_string()
}

/// Read the contents of a file.
pub struct ReadFile {
    sandbox: SandboxHandle,
}

impl ReadFile {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    file_path: String,
}

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file from the repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to file relative to workspace/repo"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: ReadFileArgs = parse_args(args)?;
        let path = resolve_repo_path(&args.file_path);

        let bytes = self.sandbox.download_file(&path).await?;
        let size = bytes.len();
        let content = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => {
                return Ok(ToolResult::failure(format!(
                    "Binary file detected: {} ({} bytes). Use run_command with `file` or `strings` to inspect it.",
                    path, size
                )))
            }
        };

        Ok(
            ToolResult::ok(json!({ "content": content, "path": path }))
                .with_metadata("size_bytes", size),
        )
    }
}

/// List files and directories.
pub struct ListFiles {
    sandbox: SandboxHandle,
}

impl ListFiles {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default = "default_repo_dir")]
    directory: String,
}

#[async_trait]
impl Tool for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories in a path"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": {
                    "type": "string",
                    "description": "Directory path (default: workspace/repo)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: ListFilesArgs = parse_args(args)?;
        let directory = resolve_repo_path(&args.directory);

        let files = self.sandbox.list_files(&directory).await?;
        let count = files.len();

        Ok(
            ToolResult::ok(json!({ "files": files, "directory": directory }))
                .with_metadata("count", count),
        )
    }
}

/// Search for text in files (recursive grep).
pub struct SearchFiles {
    sandbox: SandboxHandle,
}

impl SearchFiles {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct SearchFilesArgs {
    pattern: String,
    #[serde(default = "default_repo_dir")]
    path: String,
}

#[async_trait]
impl Tool for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for text patterns in files (recursive grep)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Text pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Path to search in (default: workspace/repo)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: SearchFilesArgs = parse_args(args)?;
        let path = resolve_repo_path(&args.path);

        let matches = self.sandbox.find_files(&path, &args.pattern).await?;
        let match_count = matches.len();

        Ok(
            ToolResult::ok(json!({ "matches": matches, "pattern": args.pattern }))
                .with_metadata("match_count", match_count),
        )
    }
}

/// Replace text in one or more files.
pub struct ReplaceInFiles {
    sandbox: SandboxHandle,
}

impl ReplaceInFiles {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct ReplaceInFilesArgs {
    files: Vec<String>,
    pattern: String,
    replacement: String,
}

#[async_trait]
impl Tool for ReplaceInFiles {
    fn name(&self) -> &str {
        "replace_in_files"
    }

    fn description(&self) -> &str {
        "Replace text in one or more files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of file paths to modify"
                },
                "pattern": {
                    "type": "string",
                    "description": "Text pattern to find"
                },
                "replacement": {
                    "type": "string",
                    "description": "Text to replace with"
                }
            },
            "required": ["files", "pattern", "replacement"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: ReplaceInFilesArgs = parse_args(args)?;
        if args.files.is_empty() {
            return Ok(ToolResult::failure("No files given"));
        }
        let full_paths: Vec<String> = args.files.iter().map(|f| resolve_repo_path(f)).collect();

        self.sandbox
            .replace_in_files(&full_paths, &args.pattern, &args.replacement)
            .await?;

        let file_count = full_paths.len();
        Ok(ToolResult::ok(json!({
            "files_modified": full_paths,
            "pattern": args.pattern,
            "replacement": args.replacement,
        }))
        .with_metadata("file_count", file_count))
    }
}

/// Create a new file (overwrites an existing one).
pub struct CreateFile {
    sandbox: SandboxHandle,
}

impl CreateFile {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct CreateFileArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for CreateFile {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path for new file relative to workspace/repo"
                },
                "content": {
                    "type": "string",
                    "description": "File content"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: CreateFileArgs = parse_args(args)?;
        let full_path = resolve_repo_path(&args.file_path);
        let size = args.content.len();

        self.sandbox
            .upload_file(&full_path, args.content.into_bytes())
            .await?;

        Ok(
            ToolResult::ok(json!({ "path": args.file_path, "size": size }))
                .with_metadata("created", true),
        )
    }
}

/// Delete a file.
pub struct DeleteFile {
    sandbox: SandboxHandle,
}

impl DeleteFile {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteFileArgs {
    file_path: String,
}

#[async_trait]
impl Tool for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from the repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to file relative to workspace/repo"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: DeleteFileArgs = parse_args(args)?;
        let full_path = resolve_repo_path(&args.file_path);

        self.sandbox.delete_file(&full_path).await?;

        Ok(ToolResult::ok(json!({ "path": args.file_path, "deleted": true })))
    }
}
