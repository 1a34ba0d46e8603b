//! Completion tools - let the agent signal that its task is finished.
//!
//! Each tool validates and normalises its fields, then returns a result whose
//! data carries `completed: true`. Invalid enum values fail closed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Tool, ToolResult};

const VERDICTS: &[&str] = &["APPROVE", "REQUEST_CHANGES", "COMMENT"];
const SEVERITIES: &[&str] = &["low", "medium", "high", "critical"];
const CHANGE_TYPES: &[&str] = &[
    "feature", "bugfix", "refactor", "docs", "test", "chore", "other",
];

/// Normalise `raw` and check it against `allowed`, or fall back to `default`.
fn normalize_choice(
    field: &str,
    raw: Option<&str>,
    allowed: &[&str],
    default: &str,
    upper: bool,
) -> Result<String, String> {
    let Some(raw) = raw else {
        return Ok(default.to_string());
    };
    let trimmed = raw.trim();
    let normalized = if upper {
        trimmed.to_uppercase()
    } else {
        trimmed.to_lowercase()
    };
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

fn require_text(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("'{}' must not be empty", field))
    } else {
        Ok(())
    }
}

fn completion(data: Value) -> ToolResult {
    ToolResult::ok(data).with_metadata("type", "completion")
}

/// Signal that a code review is complete.
pub struct FinishReview;

#[derive(Debug, Deserialize)]
struct FinishReviewArgs {
    summary: String,
    #[serde(default)]
    verdict: Option<String>,
    #[serde(default)]
    overall_severity: Option<String>,
}

#[async_trait]
impl Tool for FinishReview {
    fn name(&self) -> &str {
        "finish_review"
    }

    fn description(&self) -> &str {
        "Complete the code review and return final results. Call this when you have finished analyzing the PR and posted your findings."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Overall review summary in markdown format"
                },
                "verdict": {
                    "type": "string",
                    "enum": VERDICTS,
                    "description": "Review decision (default: COMMENT)"
                },
                "overall_severity": {
                    "type": "string",
                    "enum": SEVERITIES,
                    "description": "Overall severity of issues found (default: medium)"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: FinishReviewArgs = parse_args(args)?;
        let checked = require_text("summary", &args.summary).and_then(|_| {
            let verdict =
                normalize_choice("verdict", args.verdict.as_deref(), VERDICTS, "COMMENT", true)?;
            let severity = normalize_choice(
                "overall_severity",
                args.overall_severity.as_deref(),
                SEVERITIES,
                "medium",
                false,
            )?;
            Ok((verdict, severity))
        });

        let (verdict, severity) = match checked {
            Ok(fields) => fields,
            Err(msg) => return Ok(ToolResult::failure(msg)),
        };

        Ok(completion(json!({
            "summary": args.summary,
            "verdict": verdict,
            "overall_severity": severity,
            "completed": true,
        })))
    }
}

/// Signal that a coding task is complete (changes pushed to a branch).
pub struct FinishTask;

#[derive(Debug, Deserialize)]
struct FinishTaskArgs {
    summary: String,
    branch_name: String,
    #[serde(default)]
    files_changed: Vec<String>,
}

#[async_trait]
impl Tool for FinishTask {
    fn name(&self) -> &str {
        "finish_task"
    }

    fn description(&self) -> &str {
        "Complete the coding task. Call this after you've implemented changes, tested them, and pushed to a branch."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Summary of what was implemented"
                },
                "branch_name": {
                    "type": "string",
                    "description": "Name of the branch with changes"
                },
                "files_changed": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Files that were modified"
                }
            },
            "required": ["summary", "branch_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: FinishTaskArgs = parse_args(args)?;
        if let Err(msg) = require_text("summary", &args.summary)
            .and_then(|_| require_text("branch_name", &args.branch_name))
        {
            return Ok(ToolResult::failure(msg));
        }

        Ok(completion(json!({
            "summary": args.summary,
            "branch_name": args.branch_name.trim(),
            "files_changed": args.files_changed,
            "completed": true,
        })))
    }
}

/// Signal that a PR summary is complete.
pub struct FinishSummary;

#[derive(Debug, Deserialize)]
struct FinishSummaryArgs {
    summary_text: String,
    pr_title: String,
    #[serde(default)]
    change_type: Option<String>,
}

#[async_trait]
impl Tool for FinishSummary {
    fn name(&self) -> &str {
        "finish_summary"
    }

    fn description(&self) -> &str {
        "Complete the pull request summary. Call this once with the final markdown summary."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary_text": {
                    "type": "string",
                    "description": "Complete PR summary in markdown format"
                },
                "pr_title": {
                    "type": "string",
                    "description": "Suggested concise title for the pull request"
                },
                "change_type": {
                    "type": "string",
                    "enum": CHANGE_TYPES,
                    "description": "Primary kind of change (default: other)"
                }
            },
            "required": ["summary_text", "pr_title"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        let args: FinishSummaryArgs = parse_args(args)?;
        let checked = require_text("summary_text", &args.summary_text)
            .and_then(|_| require_text("pr_title", &args.pr_title))
            .and_then(|_| {
                normalize_choice(
                    "change_type",
                    args.change_type.as_deref(),
                    CHANGE_TYPES,
                    "other",
                    false,
                )
            });

        let change_type = match checked {
            Ok(change_type) => change_type,
            Err(msg) => return Ok(ToolResult::failure(msg)),
        };

        Ok(completion(json!({
            "summary_text": args.summary_text,
            "pr_title": args.pr_title.trim(),
            "change_type": change_type,
            "completed": true,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finish_review_applies_defaults() {
        let result = FinishReview
            .execute(json!({"summary": "ok", "verdict": "APPROVE"}))
            .await
            .unwrap();

        assert_eq!(
            result.data,
            Some(json!({
                "summary": "ok",
                "verdict": "APPROVE",
                "overall_severity": "medium",
                "completed": true
            }))
        );
        assert_eq!(result.metadata["type"], "completion");
        assert!(result.completion_payload().is_some());
    }

    #[tokio::test]
    async fn finish_review_normalizes_case() {
        let result = FinishReview
            .execute(json!({
                "summary": "needs work",
                "verdict": "request_changes",
                "overall_severity": "HIGH"
            }))
            .await
            .unwrap();

        let data = result.data.unwrap();
        assert_eq!(data["verdict"], "REQUEST_CHANGES");
        assert_eq!(data["overall_severity"], "high");
    }

    #[tokio::test]
    async fn finish_review_fails_closed_on_bad_enum() {
        let result = FinishReview
            .execute(json!({"summary": "ok", "verdict": "LGTM"}))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.completion_payload().is_none());
        assert!(result.error.unwrap().contains("Invalid verdict 'LGTM'"));

        let result = FinishReview
            .execute(json!({"summary": "ok", "overall_severity": "extreme"}))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn finish_task_requires_branch() {
        let result = FinishTask
            .execute(json!({"summary": "done", "branch_name": "  "}))
            .await
            .unwrap();
        assert!(!result.success);

        let result = FinishTask
            .execute(json!({"summary": "done", "branch_name": "fix/7"}))
            .await
            .unwrap();
        let data = result.completion_payload().unwrap();
        assert_eq!(data["files_changed"], json!([]));
        assert_eq!(data["branch_name"], "fix/7");
    }

    #[tokio::test]
    async fn finish_summary_defaults_change_type() {
        let result = FinishSummary
            .execute(json!({"summary_text": "## Summary", "pr_title": "Add cache"}))
            .await
            .unwrap();
        assert_eq!(result.data.unwrap()["change_type"], "other");

        let result = FinishSummary
            .execute(json!({"summary_text": "x", "pr_title": "y", "change_type": "hotfix"}))
            .await
            .unwrap();
        assert!(!result.success);
    }
}
