//! Conversation state of one agent run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ChatMessage;

/// Status of a run in its lifecycle.
///
/// # State Machine
/// ```text
/// Pending -> Executing -> Completed
///                     \-> Failed
/// ```
/// Pending may also go straight to Completed or Failed when the run is
/// stopped before its first step (budget, cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Transcript, counters and outcome of one run.
///
/// # Invariants
/// - Once `status` is terminal, nothing changes: counters, transcript and
///   outcome are frozen and further mutations are ignored
/// - `result.is_some()` iff `status == Completed`
/// - `error.is_some()` iff `status == Failed`
/// - `messages` is append-only
///
/// Fields are private; every mutation goes through a method that upholds
/// the invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    task_id: String,
    status: AgentStatus,
    iteration: u32,
    tokens_used: u64,
    tool_calls_made: u64,
    start_time: DateTime<Utc>,
    last_update: DateTime<Utc>,
    messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ConversationState {
    /// # Postconditions
    /// - `status == Pending`, all counters zero
    /// - `start_time == last_update`
    pub fn new(task_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            status: AgentStatus::Pending,
            iteration: 0,
            tokens_used: 0,
            tool_calls_made: 0,
            start_time: now,
            last_update: now,
            messages,
            result: None,
            error: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    pub fn tool_calls_made(&self) -> u64 {
        self.tool_calls_made
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // Mutations with invariant enforcement

    /// Start a new iteration. Returns `false` (and changes nothing) if the
    /// run is already terminal.
    pub(crate) fn begin_iteration(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.iteration += 1;
        self.last_update = Utc::now();
        self.status = AgentStatus::Executing;
        true
    }

    pub(crate) fn add_tokens(&mut self, tokens: u64) {
        if !self.is_terminal() {
            self.tokens_used = self.tokens_used.saturating_add(tokens);
        }
    }

    pub(crate) fn add_tool_calls(&mut self, count: u64) {
        if !self.is_terminal() {
            self.tool_calls_made = self.tool_calls_made.saturating_add(count);
        }
    }

    pub(crate) fn push_message(&mut self, message: ChatMessage) {
        if !self.is_terminal() {
            self.messages.push(message);
        }
    }

    /// Finish successfully. Returns `false` if the run was already terminal.
    pub(crate) fn complete(&mut self, result: Value) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = AgentStatus::Completed;
        self.result = Some(result);
        self.last_update = Utc::now();
        true
    }

    /// Finish with an error. Returns `false` if the run was already terminal.
    pub(crate) fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = AgentStatus::Failed;
        self.error = Some(error.into());
        self.last_update = Utc::now();
        true
    }
}
