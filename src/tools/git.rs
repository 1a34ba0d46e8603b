//! Git operation tools.
//!
//! Every tool takes an optional `path` to the repository; it defaults to the
//! task checkout at `workspace/repo`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, resolve_repo_path, Tool, ToolResult};
use crate::sandbox::{SandboxHandle, REPO_DIR};

fn default_repo_dir() -> String {
    REPO_DIR.to_string()
}

fn path_schema() -> Value {
    json!({
        "type": "string",
        "description": "Repository path (default: workspace/repo)"
    })
}

#[derive(Debug, Deserialize)]
struct RepoArgs {
    #[serde(default = "default_repo_dir")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct BranchArgs {
    branch_name: String,
    #[serde(default = "default_repo_dir")]
    path: String,
}

macro_rules! sandbox_tool {
    ($name:ident) => {
        pub struct $name {
            sandbox: SandboxHandle,
        }

        impl $name {
            pub fn new(sandbox: SandboxHandle) -> Self {
                Self { sandbox }
            }
        }
    };
}

sandbox_tool!(GitStatusTool);
sandbox_tool!(GitBranches);
sandbox_tool!(GitCreateBranch);
sandbox_tool!(GitCheckoutBranch);
sandbox_tool!(GitAdd);
sandbox_tool!(GitCommit);
sandbox_tool!(GitPush);
sandbox_tool!(GitPull);

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Get the current status of the Git repository (branch, modified files, commits ahead/behind)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_schema() },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RepoArgs = parse_args(args)?;
        let status = self.sandbox.git_status(&resolve_repo_path(&args.path)).await?;
        Ok(ToolResult::ok(json!({
            "current_branch": status.current_branch,
            "ahead": status.ahead,
            "behind": status.behind,
            "modified_files": status.modified_files,
        })))
    }
}

#[async_trait]
impl Tool for GitBranches {
    fn name(&self) -> &str {
        "git_branches"
    }

    fn description(&self) -> &str {
        "List all branches in the repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_schema() },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RepoArgs = parse_args(args)?;
        let branches = self
            .sandbox
            .git_branches(&resolve_repo_path(&args.path))
            .await?;
        let count = branches.len();
        Ok(ToolResult::ok(json!({ "branches": branches })).with_metadata("count", count))
    }
}

#[async_trait]
impl Tool for GitCreateBranch {
    fn name(&self) -> &str {
        "git_create_branch"
    }

    fn description(&self) -> &str {
        "Create a new Git branch"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "branch_name": {
                    "type": "string",
                    "description": "Name of the new branch"
                },
                "path": path_schema()
            },
            "required": ["branch_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: BranchArgs = parse_args(args)?;
        self.sandbox
            .git_create_branch(&resolve_repo_path(&args.path), &args.branch_name)
            .await?;
        Ok(ToolResult::ok(json!({ "branch": args.branch_name })))
    }
}

#[async_trait]
impl Tool for GitCheckoutBranch {
    fn name(&self) -> &str {
        "git_checkout_branch"
    }

    fn description(&self) -> &str {
        "Switch to a different Git branch"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "branch_name": {
                    "type": "string",
                    "description": "Name of branch to checkout"
                },
                "path": path_schema()
            },
            "required": ["branch_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: BranchArgs = parse_args(args)?;
        self.sandbox
            .git_checkout_branch(&resolve_repo_path(&args.path), &args.branch_name)
            .await?;
        Ok(ToolResult::ok(json!({ "branch": args.branch_name })))
    }
}

#[derive(Debug, Deserialize)]
struct GitAddArgs {
    files: Vec<String>,
    #[serde(default = "default_repo_dir")]
    path: String,
}

#[async_trait]
impl Tool for GitAdd {
    fn name(&self) -> &str {
        "git_add"
    }

    fn description(&self) -> &str {
        "Stage files for commit (git add)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "List of files to stage (use ['.'] for all changes)"
                },
                "path": path_schema()
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: GitAddArgs = parse_args(args)?;
        self.sandbox
            .git_add(&resolve_repo_path(&args.path), &args.files)
            .await?;
        Ok(ToolResult::ok(json!({ "staged_files": args.files })))
    }
}

#[derive(Debug, Deserialize)]
struct GitCommitArgs {
    message: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    author_email: Option<String>,
    #[serde(default = "default_repo_dir")]
    path: String,
}

#[async_trait]
impl Tool for GitCommit {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Commit staged changes with a message"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Commit message" },
                "author_name": {
                    "type": "string",
                    "description": "Author name (optional). If omitted, uses git config identity."
                },
                "author_email": {
                    "type": "string",
                    "description": "Author email (optional). If omitted, uses git config identity."
                },
                "path": path_schema()
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: GitCommitArgs = parse_args(args)?;
        let path = resolve_repo_path(&args.path);
        let name = args.author_name.as_deref().unwrap_or("").trim();
        let email = args.author_email.as_deref().unwrap_or("").trim();

        if !name.is_empty() && !email.is_empty() {
            self.sandbox
                .git_commit(&path, &args.message, name, email)
                .await?;
            return Ok(ToolResult::ok(json!({
                "message": args.message,
                "author": format!("{} <{}>", name, email),
            })));
        }

        // Without a full explicit identity, let the repository's git config decide.
        let command = format!("git commit -m {}", shell_quote(&args.message));
        let response = self
            .sandbox
            .exec(&command, Some(&path), Some(Duration::from_secs(30)))
            .await?;
        Ok(ToolResult::with_status(
            response.succeeded(),
            json!({
                "message": args.message,
                "author": "git-config",
                "stdout": response.result,
                "exit_code": response.exit_code,
            }),
        ))
    }
}

#[async_trait]
impl Tool for GitPush {
    fn name(&self) -> &str {
        "git_push"
    }

    fn description(&self) -> &str {
        "Push committed changes to remote repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_schema() },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RepoArgs = parse_args(args)?;
        self.sandbox.git_push(&resolve_repo_path(&args.path)).await?;
        Ok(ToolResult::ok(json!({ "pushed": true })))
    }
}

#[async_trait]
impl Tool for GitPull {
    fn name(&self) -> &str {
        "git_pull"
    }

    fn description(&self) -> &str {
        "Pull latest changes from remote repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": path_schema() },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RepoArgs = parse_args(args)?;
        self.sandbox.git_pull(&resolve_repo_path(&args.path)).await?;
        Ok(ToolResult::ok(json!({ "pulled": true })))
    }
}

/// Single-quote `s` for a POSIX shell. Nothing inside single quotes is
/// expanded; an embedded `'` closes the quote, is escaped and reopens it.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSandbox;
    use std::sync::Arc;

    #[tokio::test]
    async fn commit_with_full_identity_uses_git_api() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));

        let result = GitCommit::new(sandbox.clone())
            .execute(json!({
                "message": "Fix bug",
                "author_name": " Ada ",
                "author_email": "ada@example.com"
            }))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data.unwrap()["author"], "Ada <ada@example.com>");
        assert_eq!(
            sandbox.commits(),
            vec![("Fix bug".to_string(), "Ada".to_string(), "ada@example.com".to_string())]
        );
        assert!(sandbox.commands().is_empty());
    }

    #[tokio::test]
    async fn commit_with_partial_identity_falls_back_to_shell() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));

        let result = GitCommit::new(sandbox.clone())
            .execute(json!({"message": "Say \"hi\"", "author_name": "Ada"}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data.as_ref().unwrap()["author"], "git-config");
        assert!(sandbox.commits().is_empty());
        let commands = sandbox.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, r#"git commit -m 'Say "hi"'"#);
        assert_eq!(commands[0].cwd.as_deref(), Some("workspace/repo"));
        assert_eq!(commands[0].timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn shell_commit_message_is_never_expanded() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));

        GitCommit::new(sandbox.clone())
            .execute(json!({"message": "Use `id` and $(whoami) in ${HOME}; it's fine"}))
            .await
            .unwrap();

        let commands = sandbox.commands();
        assert_eq!(
            commands[0].command,
            r"git commit -m 'Use `id` and $(whoami) in ${HOME}; it'\''s fine'"
        );
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[tokio::test]
    async fn shell_commit_failure_is_reported_not_raised() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));
        sandbox.set_exec_response(1, "nothing to commit");

        let result = GitCommit::new(sandbox)
            .execute(json!({"message": "empty"}))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.data.unwrap()["exit_code"], 1);
    }

    #[tokio::test]
    async fn branch_workflow() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));

        GitCreateBranch::new(sandbox.clone())
            .execute(json!({"branch_name": "fix/issue-7"}))
            .await
            .unwrap();
        GitCheckoutBranch::new(sandbox.clone())
            .execute(json!({"branch_name": "fix/issue-7"}))
            .await
            .unwrap();

        let status = GitStatusTool::new(sandbox.clone())
            .execute(json!({}))
            .await
            .unwrap();
        assert_eq!(status.data.unwrap()["current_branch"], "fix/issue-7");

        let branches = GitBranches::new(sandbox)
            .execute(json!({}))
            .await
            .unwrap();
        assert_eq!(branches.metadata["count"], 2);
    }

    #[tokio::test]
    async fn push_failure_surfaces_as_error() {
        let sandbox = Arc::new(FakeSandbox::new("sb"));
        sandbox.fail_git("remote rejected");

        let err = GitPush::new(sandbox).execute(json!({})).await.unwrap_err();
        assert!(err.to_string().contains("remote rejected"));
    }
}
