//! Review finding tools - post findings to the pull request as the agent
//! discovers them, then keep a durable record.
//!
//! A failed post or a failed write to the store is reported as a failed
//! result so the model can react; it never aborts the review.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Tool, ToolResult};
use crate::github::{InlineComment, PullRequestRef, ReviewPoster};
use crate::store::{FindingRecord, FindingStore};

const SEVERITIES: &[&str] = &["CRITICAL", "ERROR", "INFO", "WARNING"];
const CATEGORIES: &[&str] = &[
    "BUG",
    "DOCUMENTATION",
    "MAINTAINABILITY",
    "PERFORMANCE",
    "SECURITY",
    "STYLE",
    "TESTING",
];

/// Where findings of one review go.
#[derive(Clone)]
pub struct FindingContext {
    pub poster: Arc<dyn ReviewPoster>,
    pub store: Arc<dyn FindingStore>,
    pub target: PullRequestRef,
    pub review_id: String,
}

impl FindingContext {
    pub fn new(
        poster: Arc<dyn ReviewPoster>,
        store: Arc<dyn FindingStore>,
        target: PullRequestRef,
        review_id: impl Into<String>,
    ) -> Self {
        Self {
            poster,
            store,
            target,
            review_id: review_id.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(poster: Arc<crate::test_support::RecordingPoster>) -> Self {
        Self::new(
            poster,
            Arc::new(crate::store::InMemoryFindingStore::new()),
            PullRequestRef {
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                pr_number: 7,
                commit_sha: "deadbeef".to_string(),
            },
            "review-1",
        )
    }

    async fn record(
        &self,
        file_path: &str,
        line_number: u64,
        line_end: Option<u64>,
        finding: &Finding,
        github_comment_id: Option<i64>,
    ) -> anyhow::Result<()> {
        self.store
            .insert(FindingRecord {
                review_id: self.review_id.clone(),
                file_path: file_path.to_string(),
                line_number,
                line_end,
                comment_text: finding.body.clone(),
                severity: finding.severity.clone(),
                category: finding.category.clone(),
                github_comment_id,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

/// A validated finding ready to post.
struct Finding {
    severity: String,
    category: String,
    body: String,
}

impl Finding {
    fn build(severity: &str, category: &str, issue: &str, proposed_fix: &str) -> Result<Self, String> {
        let severity = normalize_upper("severity", severity, SEVERITIES)?;
        let category = normalize_upper("category", category, CATEGORIES)?;
        let body = format!(
            "**[{}][{}]** {}\n\n**Proposed fix:**\n{}",
            severity, category, issue, proposed_fix
        );
        Ok(Self {
            severity,
            category,
            body,
        })
    }
}

fn normalize_upper(field: &str, raw: &str, allowed: &[&str]) -> Result<String, String> {
    let normalized = raw.trim().to_uppercase();
    if allowed.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(format!(
            "Invalid {} '{}'. Expected one of: {}",
            field,
            raw,
            allowed.join(", ")
        ))
    }
}

fn finding_properties() -> serde_json::Map<String, Value> {
    let schema = json!({
        "file_path": {
            "type": "string",
            "description": "Path of the file in repository"
        },
        "severity": {
            "type": "string",
            "enum": SEVERITIES
        },
        "category": {
            "type": "string",
            "enum": CATEGORIES
        },
        "issue": {
            "type": "string",
            "description": "Clear issue description"
        },
        "proposed_fix": {
            "type": "string",
            "description": "Concrete proposed fix"
        }
    });
    match schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Post one finding anchored to a line (or line range) of the diff.
pub struct PostInlineFinding {
    ctx: FindingContext,
}

impl PostInlineFinding {
    pub fn new(ctx: FindingContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct InlineFindingArgs {
    file_path: String,
    line_number: u64,
    #[serde(default)]
    line_end: Option<u64>,
    severity: String,
    category: String,
    issue: String,
    proposed_fix: String,
}

#[async_trait]
impl Tool for PostInlineFinding {
    fn name(&self) -> &str {
        "post_inline_finding"
    }

    fn description(&self) -> &str {
        "Post one inline finding on the pull request at a specific file/line. Use this progressively as you discover issues."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = finding_properties();
        properties.insert(
            "line_number".to_string(),
            json!({
                "type": "integer",
                "description": "Line number on the RIGHT side of the diff"
            }),
        );
        properties.insert(
            "line_end".to_string(),
            json!({
                "type": "integer",
                "description": "Optional ending line for multi-line finding"
            }),
        );
        json!({
            "type": "object",
            "properties": properties,
            "required": ["file_path", "line_number", "severity", "category", "issue", "proposed_fix"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: InlineFindingArgs = parse_args(args)?;
        let finding =
            match Finding::build(&args.severity, &args.category, &args.issue, &args.proposed_fix) {
                Ok(finding) => finding,
                Err(msg) => return Ok(ToolResult::failure(msg)),
            };

        let comment = InlineComment {
            path: args.file_path.clone(),
            line: args.line_end.unwrap_or(args.line_number),
            start_line: args.line_end.map(|_| args.line_number),
            body: finding.body.clone(),
        };

        let posted = match self
            .ctx
            .poster
            .post_inline_comment(&self.ctx.target, &comment)
            .await
        {
            Ok(posted) => posted,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        if let Err(e) = self
            .ctx
            .record(&args.file_path, args.line_number, args.line_end, &finding, posted.id)
            .await
        {
            tracing::error!(review = %self.ctx.review_id, "Failed to record finding: {:#}", e);
            return Ok(ToolResult::failure(format!("{:#}", e)));
        }

        Ok(ToolResult::ok(json!({
            "posted": true,
            "github_comment_id": posted.id,
            "file_path": args.file_path,
            "line_number": args.line_number,
            "line_end": args.line_end,
        })))
    }
}

/// Post one finding about a whole file.
pub struct PostFileFinding {
    ctx: FindingContext,
}

impl PostFileFinding {
    pub fn new(ctx: FindingContext) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Deserialize)]
struct FileFindingArgs {
    file_path: String,
    severity: String,
    category: String,
    issue: String,
    proposed_fix: String,
}

#[async_trait]
impl Tool for PostFileFinding {
    fn name(&self) -> &str {
        "post_file_finding"
    }

    fn description(&self) -> &str {
        "Post one file-level finding (no specific line) on the pull request. Use this when issue spans the file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": finding_properties(),
            "required": ["file_path", "severity", "category", "issue", "proposed_fix"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: FileFindingArgs = parse_args(args)?;
        let finding =
            match Finding::build(&args.severity, &args.category, &args.issue, &args.proposed_fix) {
                Ok(finding) => finding,
                Err(msg) => return Ok(ToolResult::failure(msg)),
            };

        let posted = match self
            .ctx
            .poster
            .post_file_comment(&self.ctx.target, &args.file_path, &finding.body)
            .await
        {
            Ok(posted) => posted,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };

        // File-level findings are stored against line 1.
        if let Err(e) = self
            .ctx
            .record(&args.file_path, 1, None, &finding, posted.id)
            .await
        {
            tracing::error!(review = %self.ctx.review_id, "Failed to record finding: {:#}", e);
            return Ok(ToolResult::failure(format!("{:#}", e)));
        }

        Ok(ToolResult::ok(json!({
            "posted": true,
            "github_comment_id": posted.id,
            "file_path": args.file_path,
            "level": "file",
        })))
    }
}
