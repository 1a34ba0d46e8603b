//! Execution loop: alternate between the termination policy and agent steps
//! until one of them says stop.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::agent::{Agent, StepOutcome};
use super::state::ConversationState;
use crate::budget::{Budgets, TerminationPolicy};

/// Drives one [`Agent`] to a terminal state.
///
/// # Postcondition
/// `run` always returns a terminal [`ConversationState`]: a panic inside a
/// step or a cancellation is recorded as Failed instead of propagating.
pub struct AgentLoop {
    policy: TerminationPolicy,
    cancel: Option<CancellationToken>,
}

impl AgentLoop {
    pub fn new(budgets: Budgets) -> Self {
        Self {
            policy: TerminationPolicy::new(budgets),
            cancel: None,
        }
    }

    /// Stop between iterations once `token` is cancelled. An in-flight
    /// model call or tool batch is not interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn run(&self, mut agent: Agent) -> ConversationState {
        let task_id = agent.state().task_id().to_string();
        tracing::info!(task_id = %task_id, agent = agent.kind().as_str(), "Agent loop started");

        let outcome = AssertUnwindSafe(self.drive(&mut agent)).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            tracing::error!(task_id = %task_id, "Agent loop crashed: {}", message);
            agent.state_mut().fail(message);
        }

        let state = agent.into_state();
        tracing::info!(
            task_id = %task_id,
            status = ?state.status(),
            iterations = state.iteration(),
            tokens = state.tokens_used(),
            tool_calls = state.tool_calls_made(),
            "Agent loop finished"
        );
        state
    }

    async fn drive(&self, agent: &mut Agent) {
        loop {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                tracing::warn!(task_id = %agent.state().task_id(), "Agent run cancelled");
                agent.state_mut().fail("cancelled");
                return;
            }

            if self.policy.enforce(agent.state_mut()) {
                return;
            }

            match agent.step().await {
                StepOutcome::Continue => {}
                StepOutcome::Stop(_) | StepOutcome::Fault(_) => return,
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("Agent panicked: {}", detail)
}
