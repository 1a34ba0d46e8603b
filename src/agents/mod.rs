//! Agents module - the bounded model/tool conversation.
//!
//! # Key Concepts
//! - **ConversationState**: transcript, counters and outcome of one run
//! - **Agent**: issues one step per call (model call, tool batch, completion check)
//! - **AgentLoop**: alternates the termination policy and agent steps until stop
//!
//! # Archetypes
//! - Reviewer: reviews a pull request and posts findings, ends with `finish_review`
//! - Coder: resolves an issue on a pushed branch, ends with `finish_task`
//! - Summarizer: writes a PR summary, ends with `finish_summary`

mod agent;
mod prompts;
mod runner;
mod state;

pub use agent::{Agent, AgentError, StepOutcome};
pub use prompts::{
    coder_messages, reviewer_messages, summary_messages, AgentKind, CodingRequest, ReviewRequest,
    SummaryRequest,
};
pub use runner::AgentLoop;
pub use state::{AgentStatus, ConversationState};
