//! Agent step logic.
//!
//! One [`Agent::step`] is one iteration: a single model call, then at most
//! one concurrent batch of tool calls. A step never returns `Err`: failures
//! are written to the conversation state and reported as a [`StepOutcome`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::prompts::{
    coder_messages, reviewer_messages, summary_messages, AgentKind, CodingRequest, ReviewRequest,
    SummaryRequest,
};
use super::state::{AgentStatus, ConversationState};
use crate::llm::{ChatMessage, ChatOptions, LlmClient, ToolCall};
use crate::tools::{ToolInvocation, ToolRegistry, ToolResult};

/// Diagnostic previews of tool args and metadata are cut at this many chars.
const LOG_PREVIEW_CHARS: usize = 1200;

/// Errors that end a run from inside a step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// The model call failed; the provider's message is kept verbatim.
    #[error("{0}")]
    Model(String),

    #[error("Malformed arguments for tool '{tool}': {message}")]
    MalformedToolCall { tool: String, message: String },

    #[error("Agent already finished ({0:?})")]
    Finished(AgentStatus),
}

/// What the loop should do after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Continue,
    /// A tool signalled completion; carries its payload.
    Stop(Value),
    Fault(AgentError),
}

impl StepOutcome {
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// A task-scoped driver of the model/tool conversation.
pub struct Agent {
    kind: AgentKind,
    llm: Arc<dyn LlmClient>,
    model: String,
    tools: ToolRegistry,
    options: ChatOptions,
    state: ConversationState,
}

impl Agent {
    /// Create an agent over an opening transcript. Sampling defaults to
    /// temperature 1.0.
    pub fn new(
        kind: AgentKind,
        task_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        tools: ToolRegistry,
        messages: Vec<ChatMessage>,
    ) -> Self {
        Self {
            kind,
            llm,
            model: model.into(),
            tools,
            options: ChatOptions {
                temperature: Some(1.0),
                ..Default::default()
            },
            state: ConversationState::new(task_id, messages),
        }
    }

    pub fn reviewer(
        task_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        tools: ToolRegistry,
        request: &ReviewRequest,
    ) -> Self {
        Self::new(
            AgentKind::Reviewer,
            task_id,
            llm,
            model,
            tools,
            reviewer_messages(request),
        )
    }

    pub fn coder(
        task_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        tools: ToolRegistry,
        request: &CodingRequest,
    ) -> Self {
        Self::new(
            AgentKind::Coder,
            task_id,
            llm,
            model,
            tools,
            coder_messages(request),
        )
    }

    pub fn summarizer(
        task_id: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        tools: ToolRegistry,
        request: &SummaryRequest,
    ) -> Self {
        Self::new(
            AgentKind::Summarizer,
            task_id,
            llm,
            model,
            tools,
            summary_messages(request),
        )
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ConversationState {
        &mut self.state
    }

    pub fn into_state(self) -> ConversationState {
        self.state
    }

    /// Run one iteration.
    ///
    /// # Postconditions
    /// - `Stop(payload)` ⇒ status is Completed and `result == payload`
    /// - `Fault(e)` ⇒ status is Failed and `error == e.to_string()`
    /// - `Continue` ⇒ status is Executing
    ///
    /// Stepping a terminal agent changes nothing and reports its outcome again.
    pub async fn step(&mut self) -> StepOutcome {
        if self.state.is_terminal() {
            return match self.state.result() {
                Some(result) => StepOutcome::Stop(result.clone()),
                None => StepOutcome::Fault(AgentError::Finished(self.state.status())),
            };
        }

        self.state.begin_iteration();
        tracing::debug!(
            task_id = %self.state.task_id(),
            agent = self.kind.as_str(),
            iteration = self.state.iteration(),
            "Agent iteration"
        );

        match self.advance().await {
            Ok(None) => StepOutcome::Continue,
            Ok(Some(payload)) => {
                tracing::info!(
                    task_id = %self.state.task_id(),
                    iteration = self.state.iteration(),
                    "Agent completed task"
                );
                self.state.complete(payload.clone());
                StepOutcome::Stop(payload)
            }
            Err(e) => {
                tracing::error!(
                    task_id = %self.state.task_id(),
                    iteration = self.state.iteration(),
                    "Agent iteration failed: {}",
                    e
                );
                self.state.fail(e.to_string());
                StepOutcome::Fault(e)
            }
        }
    }

    /// Model call plus tool batch. `Ok(Some(payload))` means a completion
    /// signal was received.
    async fn advance(&mut self) -> Result<Option<Value>, AgentError> {
        let schemas = self.tools.schemas();
        let tool_defs = (!schemas.is_empty()).then_some(schemas.as_slice());

        let response = self
            .llm
            .chat_completion_with_options(
                &self.model,
                self.state.messages(),
                tool_defs,
                self.options.clone(),
            )
            .await
            .map_err(|e| AgentError::Model(format!("{:#}", e)))?;

        if let Some(usage) = &response.usage {
            self.state.add_tokens(usage.total_tokens);
        }

        let calls = response.tool_calls.unwrap_or_default();
        if calls.is_empty() {
            match response.content.filter(|c| !c.is_empty()) {
                Some(content) => {
                    tracing::debug!(
                        task_id = %self.state.task_id(),
                        "Agent made no tool calls: {}",
                        preview(&content, 200)
                    );
                    self.state.push_message(ChatMessage::assistant(content));
                }
                None => tracing::debug!(
                    task_id = %self.state.task_id(),
                    "Agent returned an empty response"
                ),
            }
            return Ok(None);
        }

        let invocations = calls
            .iter()
            .map(parse_invocation)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            task_id = %self.state.task_id(),
            tools = ?invocations.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            "Agent made {} tool calls",
            invocations.len()
        );

        let results = self.tools.dispatch_batch(&invocations).await;
        self.state.add_tool_calls(invocations.len() as u64);
        log_tool_results(&invocations, &results);

        // First completion signal in request order wins.
        let completion = invocations
            .iter()
            .filter_map(|inv| results.get(&inv.id))
            .find_map(ToolResult::completion_payload);
        if let Some(payload) = completion {
            return Ok(Some(payload.clone()));
        }

        self.state
            .push_message(ChatMessage::assistant_tool_calls(response.content, calls));
        for inv in &invocations {
            let content = match results.get(&inv.id) {
                Some(result) => serde_json::to_string(result)
                    .unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string()),
                None => json!({ "error": "No result" }).to_string(),
            };
            self.state
                .push_message(ChatMessage::tool_result(inv.id.clone(), content));
        }

        Ok(None)
    }
}

fn parse_invocation(call: &ToolCall) -> Result<ToolInvocation, AgentError> {
    let raw = call.function.arguments.trim();
    let arguments = if raw.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(raw).map_err(|e| AgentError::MalformedToolCall {
            tool: call.function.name.clone(),
            message: e.to_string(),
        })?
    };

    Ok(ToolInvocation {
        id: call.id.clone(),
        name: call.function.name.clone(),
        arguments,
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn json_preview(value: &impl Serialize) -> String {
    let text = serde_json::to_string(value).unwrap_or_default();
    preview(&text, LOG_PREVIEW_CHARS)
}

fn log_tool_results(invocations: &[ToolInvocation], results: &HashMap<String, ToolResult>) {
    for inv in invocations {
        match results.get(&inv.id) {
            None => tracing::error!(tool = %inv.name, id = %inv.id, "Tool returned no result"),
            Some(result) if result.success => tracing::debug!(
                tool = %inv.name,
                args = %json_preview(&inv.arguments),
                metadata = %json_preview(&result.metadata),
                "Tool succeeded"
            ),
            Some(result) => tracing::error!(
                tool = %inv.name,
                args = %json_preview(&inv.arguments),
                error = result.error.as_deref().unwrap_or(""),
                metadata = %json_preview(&result.metadata),
                "Tool failed"
            ),
        }
    }
}
