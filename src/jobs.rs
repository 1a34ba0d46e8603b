//! Task-level flows for the three agent archetypes.
//!
//! Every job follows the same lifecycle:
//! 1. Acquire a sandbox with the repository cloned at the right branch
//! 2. Build the archetype's tool set and agent
//! 3. Drive the agent with [`AgentLoop`] under the archetype's budgets
//! 4. Release the sandbox (whatever happened in step 3)
//! 5. Check the terminal result for the archetype's required fields
//!
//! A run the termination policy cut short still ends Completed, but its
//! result holds only `{"reason": ...}`; step 5 turns that into
//! [`JobOutcome::Failed`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agents::{
    Agent, AgentKind, AgentLoop, AgentStatus, CodingRequest, ConversationState, ReviewRequest,
    SummaryRequest,
};
use crate::budget::{BudgetOverrides, Budgets};
use crate::config::AgentBudgets;
use crate::github::{PullRequestRef, ReviewPoster};
use crate::llm::LlmClient;
use crate::sandbox::{
    EnvironmentSpec, Language, SandboxError, SandboxHandle, SandboxManager, REPO_DIR,
};
use crate::store::FindingStore;
use crate::tools::{coder_tools, reviewer_tools, summary_tools, FindingContext};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Sandbox setup failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Review jobs need a GitHub poster (set GITHUB_TOKEN)")]
    MissingPoster,

    #[error("Invalid repository '{0}', expected owner/name")]
    InvalidRepository(String),
}

/// Review a pull request and post findings on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewJob {
    pub task_id: String,
    /// `owner/name`
    pub repository: String,
    pub pr_number: u64,
    /// Head commit the findings are anchored to.
    pub commit_sha: String,
    #[serde(default)]
    pub head_branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub request: ReviewRequest,
    #[serde(default)]
    pub budgets: BudgetOverrides,
}

/// Resolve an issue on a new branch and push it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingJob {
    pub task_id: String,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(flatten)]
    pub request: CodingRequest,
    #[serde(default)]
    pub budgets: BudgetOverrides,
}

/// Write a summary for a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryJob {
    pub task_id: String,
    #[serde(flatten)]
    pub request: SummaryRequest,
    #[serde(default)]
    pub budgets: BudgetOverrides,
}

/// A job as the worker receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    Review(ReviewJob),
    Coding(CodingJob),
    Summary(SummaryJob),
}

impl Job {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Review(job) => &job.task_id,
            Self::Coding(job) => &job.task_id,
            Self::Summary(job) => &job.task_id,
        }
    }
}

/// What a job produced once its result was checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(Value),
    Failed(String),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Checked outcome plus the raw terminal state of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub outcome: JobOutcome,
    pub state: ConversationState,
}

/// Runs jobs against shared collaborators.
pub struct JobRunner {
    llm: Arc<dyn LlmClient>,
    model: String,
    sandboxes: Arc<SandboxManager>,
    poster: Option<Arc<dyn ReviewPoster>>,
    store: Arc<dyn FindingStore>,
    budgets: AgentBudgets,
    cancel: Option<CancellationToken>,
}

impl JobRunner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        sandboxes: Arc<SandboxManager>,
        store: Arc<dyn FindingStore>,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            sandboxes,
            poster: None,
            store,
            budgets: AgentBudgets::default(),
            cancel: None,
        }
    }

    pub fn with_poster(mut self, poster: Arc<dyn ReviewPoster>) -> Self {
        self.poster = Some(poster);
        self
    }

    pub fn with_budgets(mut self, budgets: AgentBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn run(&self, job: &Job) -> Result<JobReport, JobError> {
        match job {
            Job::Review(job) => self.run_review(job).await,
            Job::Coding(job) => self.run_coding(job).await,
            Job::Summary(job) => self.run_summary(job).await,
        }
    }

    pub async fn run_review(&self, job: &ReviewJob) -> Result<JobReport, JobError> {
        let poster = self.poster.clone().ok_or(JobError::MissingPoster)?;
        let (owner, repo) = split_repository(&job.repository)?;

        let spec = EnvironmentSpec {
            repository_url: Some(github_clone_url(&job.repository)),
            branch: job.head_branch.clone(),
            language: sandbox_language(job.language.as_deref()),
        };
        let sandbox_key = job.task_id.clone();
        let sandbox = self.sandboxes.acquire(&sandbox_key, &spec).await?;

        let findings = FindingContext::new(
            poster,
            self.store.clone(),
            PullRequestRef {
                owner,
                repo,
                pr_number: job.pr_number,
                commit_sha: job.commit_sha.clone(),
            },
            job.task_id.clone(),
        );
        let agent = Agent::reviewer(
            job.task_id.clone(),
            self.llm.clone(),
            self.model.clone(),
            reviewer_tools(sandbox, findings),
            &job.request,
        );
        let state = self
            .drive(agent, job.budgets.apply(self.budgets.reviewer))
            .await;
        self.sandboxes.release(&sandbox_key).await;

        let outcome = review_outcome(&state);
        log_outcome(&job.task_id, "review", &outcome);
        Ok(JobReport { outcome, state })
    }

    pub async fn run_coding(&self, job: &CodingJob) -> Result<JobReport, JobError> {
        split_repository(&job.request.repository)?;

        let spec = EnvironmentSpec {
            repository_url: Some(github_clone_url(&job.request.repository)),
            branch: Some(
                job.base_branch
                    .clone()
                    .unwrap_or_else(|| "main".to_string()),
            ),
            language: sandbox_language(job.language.as_deref()),
        };
        let sandbox_key = format!("{}:coder", job.task_id);
        let sandbox = self.sandboxes.acquire(&sandbox_key, &spec).await?;

        let agent = Agent::coder(
            job.task_id.clone(),
            self.llm.clone(),
            self.model.clone(),
            coder_tools(sandbox.clone()),
            &job.request,
        );
        let state = self.drive(agent, job.budgets.apply(self.budgets.coder)).await;

        let mut outcome = coding_outcome(&state, job.request.issue_number);
        if let JobOutcome::Completed(payload) = &mut outcome {
            let reported = payload["files_changed"].clone();
            payload["files_changed"] = json!(changed_files(&sandbox, reported).await);
        }
        self.sandboxes.release(&sandbox_key).await;

        log_outcome(&job.task_id, "coding", &outcome);
        Ok(JobReport { outcome, state })
    }

    pub async fn run_summary(&self, job: &SummaryJob) -> Result<JobReport, JobError> {
        split_repository(&job.request.repository)?;

        let spec = EnvironmentSpec {
            repository_url: Some(github_clone_url(&job.request.repository)),
            branch: Some(job.request.head_branch.clone()).filter(|b| !b.trim().is_empty()),
            language: sandbox_language(job.request.language.as_deref()),
        };
        let sandbox_key = format!("{}:summary", job.task_id);
        let sandbox = self.sandboxes.acquire(&sandbox_key, &spec).await?;

        let agent = Agent::summarizer(
            job.task_id.clone(),
            self.llm.clone(),
            self.model.clone(),
            summary_tools(sandbox),
            &job.request,
        );
        let state = self
            .drive(agent, job.budgets.apply(self.budgets.summarizer))
            .await;
        self.sandboxes.release(&sandbox_key).await;

        let outcome = summary_outcome(&state);
        log_outcome(&job.task_id, "summary", &outcome);
        Ok(JobReport { outcome, state })
    }

    async fn drive(&self, agent: Agent, budgets: Budgets) -> ConversationState {
        let mut runner = AgentLoop::new(budgets);
        if let Some(token) = &self.cancel {
            runner = runner.with_cancellation(token.clone());
        }
        runner.run(agent).await
    }
}

fn split_repository(repository: &str) -> Result<(String, String), JobError> {
    match repository.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(JobError::InvalidRepository(repository.to_string())),
    }
}

fn github_clone_url(repository: &str) -> String {
    format!("https://github.com/{}.git", repository.trim())
}

/// Unknown or missing languages get the Python image.
fn sandbox_language(raw: Option<&str>) -> Language {
    raw.and_then(Language::parse).unwrap_or_default()
}

fn log_outcome(task_id: &str, job: &str, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Completed(_) => tracing::info!(task_id, job, "Job completed"),
        JobOutcome::Failed(reason) => tracing::error!(task_id, job, "Job failed: {}", reason),
    }
}

/// The result of a Completed run, or the failure to report instead.
fn completed_result<'a>(
    state: &'a ConversationState,
    fallback_error: &str,
) -> Result<&'a Value, JobOutcome> {
    match (state.status(), state.result()) {
        (AgentStatus::Completed, Some(result)) => Ok(result),
        _ => Err(JobOutcome::Failed(
            state.error().unwrap_or(fallback_error).to_string(),
        )),
    }
}

fn text_field(result: &Value, key: &str) -> Option<String> {
    result
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn missing_output(kind: AgentKind, result: &Value, default_reason: &str) -> JobOutcome {
    let reason = text_field(result, "reason").unwrap_or_else(|| default_reason.to_string());
    JobOutcome::Failed(format!(
        "Agent completed without {} output (reason={})",
        kind.completion_tool(),
        reason
    ))
}

fn run_counters(state: &ConversationState) -> Value {
    json!({
        "iterations": state.iteration(),
        "tokens_used": state.tokens_used(),
        "tool_calls": state.tool_calls_made(),
    })
}

pub(crate) fn review_outcome(state: &ConversationState) -> JobOutcome {
    let result = match completed_result(state, "Agent did not complete review") {
        Ok(result) => result,
        Err(failed) => return failed,
    };
    let Some(summary) = text_field(result, "summary") else {
        return missing_output(AgentKind::Reviewer, result, "missing_summary");
    };

    JobOutcome::Completed(json!({
        "summary": summary,
        "verdict": text_field(result, "verdict").unwrap_or_else(|| "COMMENT".to_string()),
        "overall_severity": text_field(result, "overall_severity")
            .unwrap_or_else(|| "medium".to_string()),
        "run": run_counters(state),
    }))
}

pub(crate) fn coding_outcome(state: &ConversationState, issue_number: u64) -> JobOutcome {
    let result = match completed_result(state, "agent_not_completed") {
        Ok(result) => result,
        Err(failed) => return failed,
    };
    let Some(branch_name) = text_field(result, "branch_name") else {
        return missing_output(AgentKind::Coder, result, "missing_branch_name");
    };
    let summary = text_field(result, "summary")
        .unwrap_or_else(|| format!("Implemented issue #{} via background agent.", issue_number));

    JobOutcome::Completed(json!({
        "summary": summary,
        "branch_name": branch_name,
        "files_changed": result.get("files_changed").cloned().unwrap_or_else(|| json!([])),
        "run": run_counters(state),
    }))
}

pub(crate) fn summary_outcome(state: &ConversationState) -> JobOutcome {
    let result = match completed_result(state, "agent_not_completed") {
        Ok(result) => result,
        Err(failed) => return failed,
    };
    let Some(summary_text) = text_field(result, "summary_text") else {
        return missing_output(AgentKind::Summarizer, result, "missing_summary_text");
    };
    let Some(pr_title) = text_field(result, "pr_title") else {
        return missing_output(AgentKind::Summarizer, result, "missing_pr_title");
    };

    JobOutcome::Completed(json!({
        "summary_text": summary_text,
        "pr_title": pr_title,
        "change_type": text_field(result, "change_type").unwrap_or_else(|| "other".to_string()),
        "run": run_counters(state),
    }))
}

/// Files touched by the pushed commit. Falls back to the working tree status,
/// then to what the agent reported.
async fn changed_files(sandbox: &SandboxHandle, reported: Value) -> Vec<String> {
    match sandbox
        .exec(
            "git diff --name-only HEAD~1..HEAD",
            Some(REPO_DIR),
            Some(Duration::from_secs(30)),
        )
        .await
    {
        Ok(response) if response.succeeded() => {
            let files = parse_name_only(&response.result);
            if !files.is_empty() {
                return files;
            }
        }
        Ok(response) => {
            tracing::debug!(exit_code = response.exit_code, "git diff for changed files failed");
        }
        Err(e) => tracing::debug!("git diff for changed files failed: {}", e),
    }

    match sandbox.git_status(REPO_DIR).await {
        Ok(status) if !status.modified_files.is_empty() => return status.modified_files,
        Ok(_) => {}
        Err(e) => tracing::debug!("git status for changed files failed: {}", e),
    }

    serde_json::from_value(reported).unwrap_or_default()
}

fn parse_name_only(output: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !files.iter().any(|f| f == line) {
            files.push(line.to_string());
        }
    }
    files
}
