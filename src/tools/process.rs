//! Process execution tools: shell commands, code snippets, tests and linters.
//!
//! Each call carries its own timeout, passed through to the sandbox.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, resolve_repo_path, Tool, ToolResult};
use crate::sandbox::{Language, SandboxHandle, REPO_DIR};

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const TEST_TIMEOUT_SECS: u64 = 120;
const LINT_TIMEOUT_SECS: u64 = 60;
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Make command output safe to hand back to the model.
///
/// Drops control characters other than newlines and tabs, and truncates long
/// output at a character boundary.
fn sanitize_output(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|&c| c == '\n' || c == '\r' || c == '\t' || (c >= ' ' && c != '\u{FFFD}'))
        .collect();

    match cleaned.char_indices().nth(MAX_OUTPUT_CHARS) {
        Some((cut, _)) => format!("{}\n... [output truncated]", &cleaned[..cut]),
        None => cleaned,
    }
}

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_target() -> String {
    ".".to_string()
}

/// Run a shell command.
pub struct RunCommand {
    sandbox: SandboxHandle,
}

impl RunCommand {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default = "default_command_timeout")]
    timeout: u64,
}

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the sandbox"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory (default: workspace/repo)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RunCommandArgs = parse_args(args)?;
        let cwd = args
            .cwd
            .as_deref()
            .map(resolve_repo_path)
            .unwrap_or_else(|| REPO_DIR.to_string());

        tracing::debug!(cwd = %cwd, timeout = args.timeout, "Executing command: {}", args.command);

        let response = self
            .sandbox
            .exec(&args.command, Some(&cwd), Some(Duration::from_secs(args.timeout)))
            .await?;

        Ok(ToolResult::with_status(
            response.succeeded(),
            json!({
                "stdout": sanitize_output(&response.result),
                "exit_code": response.exit_code,
            }),
        )
        .with_metadata("command", args.command))
    }
}

/// Execute a code snippet directly.
pub struct RunCode {
    sandbox: SandboxHandle,
}

impl RunCode {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct RunCodeArgs {
    code: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default = "default_command_timeout")]
    timeout: u64,
}

#[async_trait]
impl Tool for RunCode {
    fn name(&self) -> &str {
        "run_code"
    }

    fn description(&self) -> &str {
        "Execute code directly in the sandbox (Python, TypeScript, or JavaScript)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Code to execute"
                },
                "language": {
                    "type": "string",
                    "enum": ["python", "typescript", "javascript"],
                    "description": "Language of the snippet (default: python)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RunCodeArgs = parse_args(args)?;
        let language = match args.language.as_deref() {
            None => Language::default(),
            Some(raw) => match Language::parse(raw) {
                Some(language) => language,
                None => {
                    return Ok(ToolResult::failure(format!(
                        "Invalid language '{}'. Expected one of: python, typescript, javascript",
                        raw
                    )))
                }
            },
        };

        let response = self
            .sandbox
            .code_run(&args.code, language, Some(Duration::from_secs(args.timeout)))
            .await?;

        Ok(ToolResult::with_status(
            response.succeeded(),
            json!({
                "result": sanitize_output(&response.result),
                "exit_code": response.exit_code,
            }),
        )
        .with_metadata("code_length", args.code.len()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TestFramework {
    Pytest,
    Jest,
    Unittest,
    #[default]
    Auto,
}

impl TestFramework {
    fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::Pytest,
            other => other,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pytest => "pytest",
            Self::Jest => "jest",
            Self::Unittest => "unittest",
            Self::Auto => "auto",
        }
    }

    fn command(&self, target: &str) -> String {
        match self {
            Self::Pytest | Self::Auto => format!("pytest {} -v", target),
            Self::Jest => format!("npm test -- {}", target),
            Self::Unittest => format!("python -m unittest discover {}", target),
        }
    }
}

/// Run the repository's test suite.
pub struct RunTests {
    sandbox: SandboxHandle,
}

impl RunTests {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct RunTestsArgs {
    #[serde(default = "default_target")]
    test_path: String,
    #[serde(default)]
    framework: TestFramework,
}

#[async_trait]
impl Tool for RunTests {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn description(&self) -> &str {
        "Run test suite (pytest, jest, etc.) in the repository"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "test_path": {
                    "type": "string",
                    "description": "Path to test file or directory (default: . for all tests)"
                },
                "framework": {
                    "type": "string",
                    "enum": ["pytest", "jest", "unittest", "auto"],
                    "description": "Test framework to use (default: auto-detect)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RunTestsArgs = parse_args(args)?;
        let framework = args.framework.resolve();
        let command = framework.command(&args.test_path);

        let response = self
            .sandbox
            .exec(
                &command,
                Some(REPO_DIR),
                Some(Duration::from_secs(TEST_TIMEOUT_SECS)),
            )
            .await?;

        Ok(ToolResult::with_status(
            response.succeeded(),
            json!({
                "output": sanitize_output(&response.result),
                "exit_code": response.exit_code,
                "framework": framework.as_str(),
            }),
        )
        .with_metadata("test_path", args.test_path))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Linter {
    Ruff,
    Eslint,
    Pylint,
    #[default]
    Auto,
}

impl Linter {
    fn resolve(self) -> Self {
        match self {
            Self::Auto => Self::Ruff,
            other => other,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Ruff => "ruff",
            Self::Eslint => "eslint",
            Self::Pylint => "pylint",
            Self::Auto => "auto",
        }
    }

    fn command(&self, target: &str) -> String {
        match self {
            Self::Ruff | Self::Auto => format!("ruff check {}", target),
            Self::Eslint => format!("npx eslint {}", target),
            Self::Pylint => format!("pylint {}", target),
        }
    }
}

/// Run a code linter.
pub struct RunLinter {
    sandbox: SandboxHandle,
}

impl RunLinter {
    pub fn new(sandbox: SandboxHandle) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct RunLinterArgs {
    #[serde(default = "default_target")]
    path: String,
    #[serde(default)]
    linter: Linter,
}

#[async_trait]
impl Tool for RunLinter {
    fn name(&self) -> &str {
        "run_linter"
    }

    fn description(&self) -> &str {
        "Run linter (ruff, eslint, etc.) to check code quality"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to lint (default: . for entire repo)"
                },
                "linter": {
                    "type": "string",
                    "enum": ["ruff", "eslint", "pylint", "auto"],
                    "description": "Linter to use (default: auto-detect)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: RunLinterArgs = parse_args(args)?;
        let linter = args.linter.resolve();
        let command = linter.command(&args.path);

        let response = self
            .sandbox
            .exec(
                &command,
                Some(REPO_DIR),
                Some(Duration::from_secs(LINT_TIMEOUT_SECS)),
            )
            .await?;

        Ok(ToolResult::with_status(
            response.succeeded(),
            json!({
                "output": sanitize_output(&response.result),
                "exit_code": response.exit_code,
                "linter": linter.as_str(),
            }),
        )
        .with_metadata("path", args.path))
    }
}
