//! Tool system for the agent.
//!
//! Tools are the agent's only way to act on the task's sandbox: reading and
//! editing files, running git and processes, posting review findings, and
//! finally signalling completion.
//!
//! ## Repository-relative paths
//!
//! Paths supplied by the model are resolved against the cloned repository:
//! - Relative paths (e.g., `src/main.rs`) become `workspace/repo/src/main.rs`
//! - Paths already under `workspace/` or absolute paths are used as-is

mod completion;
mod file_ops;
mod findings;
mod git;
mod process;

pub use completion::{FinishReview, FinishSummary, FinishTask};
pub use file_ops::{CreateFile, DeleteFile, ListFiles, ReadFile, ReplaceInFiles, SearchFiles};
pub use findings::{FindingContext, PostFileFinding, PostInlineFinding};
pub use git::{
    GitAdd, GitBranches, GitCheckoutBranch, GitCommit, GitCreateBranch, GitPull, GitPush,
    GitStatusTool,
};
pub use process::{RunCode, RunCommand, RunLinter, RunTests};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{FunctionDefinition, ToolDefinition};
use crate::sandbox::{SandboxHandle, REPO_DIR};

// ============================================================================
// Path Resolution
// ============================================================================

/// Resolve a model-supplied path against the repository checkout.
pub fn resolve_repo_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') || path.starts_with("workspace/") {
        path.to_string()
    } else if path.is_empty() || path == "." {
        REPO_DIR.to_string()
    } else {
        format!("{}/{}", REPO_DIR, path.trim_start_matches("./"))
    }
}

// ============================================================================
// Results and invocations
// ============================================================================

/// Outcome of one tool invocation.
///
/// A successful result whose `data` is an object with a truthy `completed`
/// key is a completion signal: the agent stops and adopts `data` as its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ToolResult {
    /// A successful result carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self::with_status(true, data)
    }

    /// A result whose success is decided by the caller (e.g. from an exit code).
    pub fn with_status(success: bool, data: Value) -> Self {
        Self {
            success,
            data: Some(data),
            error: None,
            metadata: Map::new(),
        }
    }

    /// A failed result with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// The completion payload, if this result is a completion signal.
    pub fn completion_payload(&self) -> Option<&Value> {
        if !self.success {
            return None;
        }
        let data = self.data.as_ref()?;
        let completed = data.as_object()?.get("completed")?;
        is_truthy(completed).then_some(data)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// One tool call requested by the model, with parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Correlation id assigned by the model.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Deserialize a tool's typed arguments.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> anyhow::Result<T> {
    let args = if args.is_null() {
        Value::Object(Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("Invalid arguments: {}", e))
}

// ============================================================================
// Tool Trait and Registry
// ============================================================================

/// Trait for implementing tools.
///
/// `execute` reports expected failures (remote errors, bad arguments, invalid
/// enum values) either as a failed [`ToolResult`] or as `Err`; the registry
/// turns `Err` into a failed result, so neither reaches the agent as a fault.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult>;
}

/// Registry of available tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Register several tools in order.
    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) {
        for tool in tools {
            self.register(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool schemas in LLM-compatible format, sorted by name.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        let mut schemas: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect();
        schemas.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        schemas
    }

    /// Execute a tool by name. Never fails: unknown tools and tool errors
    /// come back as failed results.
    pub async fn dispatch(&self, name: &str, args: Value) -> ToolResult {
        dispatch_one(self.tools.get(name).cloned(), name.to_string(), args).await
    }

    /// Execute several invocations concurrently.
    ///
    /// Every invocation id appears exactly once in the returned map. A tool
    /// that panics is reported as a failed result for its own id only.
    pub async fn dispatch_batch(
        &self,
        invocations: &[ToolInvocation],
    ) -> HashMap<String, ToolResult> {
        let pending = invocations.iter().map(|inv| {
            dispatch_one(
                self.tools.get(&inv.name).cloned(),
                inv.name.clone(),
                inv.arguments.clone(),
            )
        });

        let results = join_all(pending).await;
        invocations
            .iter()
            .map(|inv| inv.id.clone())
            .zip(results)
            .collect()
    }
}

/// Run one tool on its own task so a panic is reported as a failed result
/// instead of unwinding into the caller.
async fn dispatch_one(tool: Option<Arc<dyn Tool>>, name: String, args: Value) -> ToolResult {
    let Some(tool) = tool else {
        return not_found(&name);
    };
    match tokio::spawn(async move { tool.execute(args).await }).await {
        Ok(outcome) => tool_outcome(&name, outcome),
        Err(join_err) => {
            tracing::error!(tool = %name, "Tool task aborted: {}", join_err);
            ToolResult::failure(format!("Tool '{}' crashed: {}", name, join_err))
                .with_metadata("tool", name.as_str())
        }
    }
}

fn not_found(name: &str) -> ToolResult {
    ToolResult::failure(format!("Tool not found: {}", name))
}

fn tool_outcome(name: &str, outcome: anyhow::Result<ToolResult>) -> ToolResult {
    outcome.unwrap_or_else(|e| ToolResult::failure(format!("{:#}", e)).with_metadata("tool", name))
}

// ============================================================================
// Tool sets per agent archetype
// ============================================================================

/// Read-only inspection plus verification and finding posting.
pub fn reviewer_tools(sandbox: SandboxHandle, findings: FindingContext) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_all([
        Arc::new(ReadFile::new(sandbox.clone())) as Arc<dyn Tool>,
        Arc::new(ListFiles::new(sandbox.clone())),
        Arc::new(SearchFiles::new(sandbox.clone())),
        Arc::new(GitStatusTool::new(sandbox.clone())),
        Arc::new(GitBranches::new(sandbox.clone())),
        Arc::new(RunTests::new(sandbox.clone())),
        Arc::new(RunLinter::new(sandbox.clone())),
        Arc::new(RunCommand::new(sandbox)),
        Arc::new(FinishReview),
        Arc::new(PostInlineFinding::new(findings.clone())),
        Arc::new(PostFileFinding::new(findings)),
    ]);
    registry
}

/// Full file CRUD, the git workflow and code execution.
pub fn coder_tools(sandbox: SandboxHandle) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_all([
        Arc::new(ReadFile::new(sandbox.clone())) as Arc<dyn Tool>,
        Arc::new(ListFiles::new(sandbox.clone())),
        Arc::new(SearchFiles::new(sandbox.clone())),
        Arc::new(ReplaceInFiles::new(sandbox.clone())),
        Arc::new(CreateFile::new(sandbox.clone())),
        Arc::new(DeleteFile::new(sandbox.clone())),
        Arc::new(GitStatusTool::new(sandbox.clone())),
        Arc::new(GitBranches::new(sandbox.clone())),
        Arc::new(GitCreateBranch::new(sandbox.clone())),
        Arc::new(GitCheckoutBranch::new(sandbox.clone())),
        Arc::new(GitAdd::new(sandbox.clone())),
        Arc::new(GitCommit::new(sandbox.clone())),
        Arc::new(GitPush::new(sandbox.clone())),
        Arc::new(GitPull::new(sandbox.clone())),
        Arc::new(RunCode::new(sandbox.clone())),
        Arc::new(RunTests::new(sandbox.clone())),
        Arc::new(RunLinter::new(sandbox.clone())),
        Arc::new(RunCommand::new(sandbox)),
        Arc::new(FinishTask),
    ]);
    registry
}

/// Minimal read-only inspection for PR summaries.
pub fn summary_tools(sandbox: SandboxHandle) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register_all([
        Arc::new(ReadFile::new(sandbox.clone())) as Arc<dyn Tool>,
        Arc::new(ListFiles::new(sandbox.clone())),
        Arc::new(SearchFiles::new(sandbox.clone())),
        Arc::new(GitStatusTool::new(sandbox)),
        Arc::new(FinishSummary),
    ]);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeSandbox, RecordingPoster};
    use serde_json::json;
    use std::time::{Duration, Instant};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo arguments back"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::ok(args))
        }
    }

    struct Sleepy(u64);

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Sleep for a while"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(ToolResult::ok(json!({"slept": self.0})))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always errors"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            anyhow::bail!("remote exploded")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
            panic!("tool bug")
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_all([
            Arc::new(Echo) as Arc<dyn Tool>,
            Arc::new(Sleepy(200)),
            Arc::new(Failing),
            Arc::new(Panicking),
        ]);
        registry
    }

    fn invocation(id: &str, name: &str) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn relative_paths_resolve_into_repo() {
        assert_eq!(resolve_repo_path("src/lib.rs"), "workspace/repo/src/lib.rs");
        assert_eq!(resolve_repo_path("./README.md"), "workspace/repo/README.md");
        assert_eq!(resolve_repo_path("."), "workspace/repo");
        assert_eq!(resolve_repo_path("workspace/repo/a"), "workspace/repo/a");
        assert_eq!(resolve_repo_path("/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn completion_signal_requires_success_and_truthy_flag() {
        let done = ToolResult::ok(json!({"completed": true, "summary": "x"}));
        assert_eq!(done.completion_payload(), done.data.as_ref());

        assert!(ToolResult::ok(json!({"completed": false}))
            .completion_payload()
            .is_none());
        assert!(ToolResult::ok(json!({"completed": 0})).completion_payload().is_none());
        assert!(ToolResult::ok(json!({"completed": "yes"}))
            .completion_payload()
            .is_some());
        assert!(ToolResult::ok(json!(["completed"])).completion_payload().is_none());
        assert!(ToolResult::with_status(false, json!({"completed": true}))
            .completion_payload()
            .is_none());
    }

    #[test]
    fn tool_result_serializes_all_fields() {
        let value = serde_json::to_value(ToolResult::failure("nope")).unwrap();
        assert_eq!(
            value,
            json!({"success": false, "data": null, "error": "nope", "metadata": {}})
        );
    }

    #[test]
    fn last_registration_wins() {
        struct OtherEcho;

        #[async_trait]
        impl Tool for OtherEcho {
            fn name(&self) -> &str {
                "echo"
            }
            fn description(&self) -> &str {
                "Second echo"
            }
            fn parameters_schema(&self) -> Value {
                json!({"type": "object", "properties": {}})
            }
            async fn execute(&self, _args: Value) -> anyhow::Result<ToolResult> {
                Ok(ToolResult::ok(json!("second")))
            }
        }

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(OtherEcho));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.schemas()[0].function.description, "Second echo");
    }

    #[test]
    fn schemas_are_function_definitions_sorted_by_name() {
        let schemas = registry().schemas();
        let names: Vec<_> = schemas.iter().map(|s| s.function.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "failing", "panicking", "sleepy"]);
        assert!(schemas.iter().all(|s| s.tool_type == "function"));
        assert_eq!(schemas[0].function.parameters["type"], "object");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_a_failure() {
        let result = registry().dispatch("nope", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn dispatch_converts_errors_to_failures() {
        let result = registry().dispatch("failing", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("remote exploded"));
        assert_eq!(result.metadata["tool"], "failing");
    }

    #[tokio::test]
    async fn dispatch_contains_tool_panics() {
        let result = registry().dispatch("panicking", json!({})).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("crashed"));
        assert_eq!(result.metadata["tool"], "panicking");
    }

    #[tokio::test]
    async fn batch_returns_every_id_even_when_tools_misbehave() {
        let invocations = vec![
            invocation("a", "echo"),
            invocation("b", "failing"),
            invocation("c", "panicking"),
            invocation("d", "missing"),
            invocation("e", "sleepy"),
        ];

        let results = registry().dispatch_batch(&invocations).await;

        assert_eq!(results.len(), invocations.len());
        assert!(results["a"].success);
        assert!(!results["b"].success);
        assert!(!results["c"].success);
        assert_eq!(results["c"].metadata["tool"], "panicking");
        assert!(results["d"].error.as_deref().unwrap().contains("not found"));
        assert!(results["e"].success);
    }

    #[tokio::test]
    async fn batch_runs_concurrently() {
        let invocations: Vec<_> = (0..5)
            .map(|i| invocation(&format!("s{}", i), "sleepy"))
            .collect();

        let start = Instant::now();
        let results = registry().dispatch_batch(&invocations).await;

        assert_eq!(results.len(), 5);
        assert!(start.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn archetype_tool_sets() {
        let sandbox: SandboxHandle = Arc::new(FakeSandbox::new("sb"));
        let findings = FindingContext::for_tests(Arc::new(RecordingPoster::default()));

        let reviewer = reviewer_tools(sandbox.clone(), findings);
        assert_eq!(reviewer.len(), 11);
        assert!(reviewer.get("finish_review").is_some());
        assert!(reviewer.get("post_inline_finding").is_some());
        assert!(reviewer.get("create_file").is_none());

        let coder = coder_tools(sandbox.clone());
        assert_eq!(coder.len(), 19);
        assert!(coder.get("git_push").is_some());
        assert!(coder.get("finish_task").is_some());

        let summary = summary_tools(sandbox);
        assert_eq!(
            summary.names(),
            vec!["finish_summary", "git_status", "list_files", "read_file", "search_files"]
        );
    }
}
