//! Agent archetypes and the opening messages of their conversations.

use serde::{Deserialize, Serialize};

use crate::budget::Budgets;
use crate::llm::ChatMessage;

/// The workflow an agent drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Reviewer,
    Coder,
    Summarizer,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reviewer => "reviewer",
            Self::Coder => "coder",
            Self::Summarizer => "summarizer",
        }
    }

    /// The tool whose result ends this kind of run.
    pub fn completion_tool(&self) -> &'static str {
        match self {
            Self::Reviewer => "finish_review",
            Self::Coder => "finish_task",
            Self::Summarizer => "finish_summary",
        }
    }

    pub fn default_budgets(&self) -> Budgets {
        match self {
            Self::Reviewer => Budgets::reviewer(),
            Self::Coder => Budgets::coder(),
            Self::Summarizer => Budgets::summarizer(),
        }
    }
}

fn default_sensitivity() -> String {
    "MEDIUM".to_string()
}

/// Pull request to review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub pr_title: String,
    #[serde(default)]
    pub pr_description: String,
    pub pr_diff: String,
    /// LOW, MEDIUM or HIGH.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: String,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

/// Issue to turn into a pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodingRequest {
    pub repository: String,
    pub issue_number: u64,
    pub issue_title: String,
    #[serde(default)]
    pub issue_body: String,
    #[serde(default)]
    pub custom_instructions: String,
}

/// Pull request to summarize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub repository: String,
    pub pr_number: u64,
    pub pr_title: String,
    #[serde(default)]
    pub pr_description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub base_branch: String,
    #[serde(default)]
    pub head_branch: String,
    pub pr_diff: String,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub lines_added: u64,
    #[serde(default)]
    pub lines_removed: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub custom_instructions: String,
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "None"
    } else {
        text
    }
}

pub fn reviewer_messages(req: &ReviewRequest) -> Vec<ChatMessage> {
    let ignore = if req.ignore_patterns.is_empty() {
        "None".to_string()
    } else {
        req.ignore_patterns.join(", ")
    };

    let system = format!(
        r#"You are an expert code reviewer working inside a sandbox with the pull request's repository checked out at workspace/repo.

## Method
1. Read the diff, then use your tools to inspect surrounding code.
2. Verify suspicious behaviour by running tests, linters or commands.
3. Post each confirmed issue as soon as you find it with `post_inline_finding` (or `post_file_finding` when it spans a file).
4. Finish by calling `finish_review` with a markdown summary, a verdict and an overall severity.

## Rules
- Sensitivity: {sensitivity}. At LOW report only bugs and security issues; at HIGH include style and maintainability.
- Never review files matching: {ignore}
- Do not repeat a finding you already posted.

## Custom instructions
{custom}"#,
        sensitivity = req.sensitivity,
        ignore = ignore,
        custom = or_none(&req.custom_instructions),
    );

    let user = format!(
        "# Pull Request Review\n\n**Title**: {}\n\n**Description**:\n{}\n\n**Diff**:\n```diff\n{}\n```\n\n---\n\nBegin your code review. Use your tools to gather context, verify behavior, and analyze the changes thoroughly. When complete, call `finish_review()` with your review.",
        req.pr_title, req.pr_description, req.pr_diff
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn coder_messages(req: &CodingRequest) -> Vec<ChatMessage> {
    let system = format!(
        r#"You are an autonomous software engineer resolving a GitHub issue in {repository}. The repository is checked out at workspace/repo.

## Workflow
1. Explore the code to understand the problem.
2. Create a branch named after the issue, e.g. `fix/issue-{issue}`.
3. Make focused changes, then run the tests and linters.
4. Commit with a descriptive message and push the branch.
5. Call `finish_task` with a summary, the branch name and the files you changed.

## Custom instructions
{custom}"#,
        repository = req.repository,
        issue = req.issue_number,
        custom = or_none(&req.custom_instructions),
    );

    let user = format!(
        "# Issue #{}: {}\n\n{}\n\nImplement a fix for this issue and push it to a new branch.",
        req.issue_number,
        req.issue_title,
        or_none(&req.issue_body)
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn summary_messages(req: &SummaryRequest) -> Vec<ChatMessage> {
    let system = format!(
        r#"You write clear pull request summaries for {repository}. The repository is checked out at workspace/repo; read files when the diff alone is not enough.

Produce markdown with an overview, the key changes grouped by area, and anything reviewers should look at closely. Call `finish_summary` exactly once with the summary, a concise title and the change type.

## Custom instructions
{custom}"#,
        repository = req.repository,
        custom = or_none(&req.custom_instructions),
    );

    let user = format!(
        "# PR #{number}: {title}\n\n**Author**: {author}\n**Branches**: {head} -> {base}\n**Language**: {language}\n**Stats**: {files} files changed, +{added} / -{removed}\n\n**Description**:\n{description}\n\n**PR Diff**:\n```diff\n{diff}\n```\n\nAnalyze the changes and call `finish_summary()` with the final result.",
        number = req.pr_number,
        title = req.pr_title,
        author = or_none(&req.author),
        head = req.head_branch,
        base = req.base_branch,
        language = req.language.as_deref().unwrap_or("unknown"),
        files = req.files_changed,
        added = req.lines_added,
        removed = req.lines_removed,
        description = or_none(&req.pr_description),
        diff = req.pr_diff,
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[test]
    fn reviewer_prompt_carries_request() {
        let req = ReviewRequest {
            pr_title: "Add cache".to_string(),
            pr_diff: "+fn cache() {}".to_string(),
            ignore_patterns: vec!["*.lock".to_string()],
            ..Default::default()
        };
        let messages = reviewer_messages(&req);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].text_content().unwrap().contains("*.lock"));
        assert!(messages[1].text_content().unwrap().contains("+fn cache() {}"));
    }

    #[test]
    fn review_request_defaults_sensitivity() {
        let req: ReviewRequest =
            serde_json::from_str(r#"{"pr_title": "t", "pr_diff": "d"}"#).unwrap();
        assert_eq!(req.sensitivity, "MEDIUM");
        assert!(req.ignore_patterns.is_empty());
    }

    #[test]
    fn completion_tools_per_kind() {
        assert_eq!(AgentKind::Reviewer.completion_tool(), "finish_review");
        assert_eq!(AgentKind::Coder.completion_tool(), "finish_task");
        assert_eq!(AgentKind::Summarizer.default_budgets(), Budgets::summarizer());
    }
}
