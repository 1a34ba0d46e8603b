//! Termination policy: decides whether a run may take another step.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::Budgets;
use crate::agents::ConversationState;

/// Which ceiling stopped a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    MaxIterations,
    MaxTokens,
    MaxToolCalls,
    MaxDuration,
}

impl LimitReason {
    /// The reason string recorded in the run's result.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxIterations => "max_iterations_reached",
            Self::MaxTokens => "max_tokens_reached",
            Self::MaxToolCalls => "max_tool_calls_reached",
            Self::MaxDuration => "max_duration_reached",
        }
    }
}

impl fmt::Display for LimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Continue,
    /// The run already finished on its own.
    AlreadyTerminal,
    LimitReached(LimitReason),
}

impl PolicyDecision {
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }
}

/// Evaluates a [`ConversationState`] against [`Budgets`].
///
/// # Property
/// `evaluate` has no side effects; only `enforce` mutates, and only by
/// completing a non-terminal state with `{"reason": <limit>}`.
#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    budgets: Budgets,
}

impl TerminationPolicy {
    pub fn new(budgets: Budgets) -> Self {
        Self { budgets }
    }

    pub fn budgets(&self) -> &Budgets {
        &self.budgets
    }

    pub fn evaluate(&self, state: &ConversationState) -> PolicyDecision {
        self.evaluate_at(state, Utc::now())
    }

    /// Evaluate as of `now`. Limits are checked in a fixed order so the
    /// recorded reason is deterministic when several trip at once.
    pub fn evaluate_at(&self, state: &ConversationState, now: DateTime<Utc>) -> PolicyDecision {
        if state.is_terminal() {
            return PolicyDecision::AlreadyTerminal;
        }

        let b = &self.budgets;
        let elapsed = (now - state.start_time())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let reason = if state.iteration() >= b.max_iterations {
            Some(LimitReason::MaxIterations)
        } else if state.tokens_used() >= b.max_tokens {
            Some(LimitReason::MaxTokens)
        } else if state.tool_calls_made() >= b.max_tool_calls {
            Some(LimitReason::MaxToolCalls)
        } else if elapsed >= b.max_duration() {
            Some(LimitReason::MaxDuration)
        } else {
            None
        };

        reason.map_or(PolicyDecision::Continue, PolicyDecision::LimitReached)
    }

    /// Evaluate and, when a limit is reached, force the state to Completed.
    /// Returns `true` if the run must stop.
    pub fn enforce(&self, state: &mut ConversationState) -> bool {
        let decision = self.evaluate(state);
        if let PolicyDecision::LimitReached(reason) = decision {
            tracing::warn!(
                task_id = %state.task_id(),
                iteration = state.iteration(),
                tokens = state.tokens_used(),
                tool_calls = state.tool_calls_made(),
                "Budget exhausted: {}",
                reason
            );
            state.complete(json!({ "reason": reason.as_str() }));
        }
        decision.should_stop()
    }
}
