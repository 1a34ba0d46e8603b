//! Resource ceilings for one agent run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ceilings a run may not reach.
///
/// Each limit is inclusive: a run stops once a counter is `>=` its ceiling.
/// The duration ceiling is checked between iterations only, so one
/// in-flight iteration (a model call plus one tool batch) can overrun it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    pub max_iterations: u32,
    pub max_tokens: u64,
    pub max_tool_calls: u64,
    pub max_duration_secs: u64,
}

impl Budgets {
    pub fn new(
        max_iterations: u32,
        max_tokens: u64,
        max_tool_calls: u64,
        max_duration_secs: u64,
    ) -> Self {
        Self {
            max_iterations,
            max_tokens,
            max_tool_calls,
            max_duration_secs,
        }
    }

    /// Reviews read a lot of code and run verification, so they get a large
    /// token and time allowance.
    pub fn reviewer() -> Self {
        Self::new(50, 1_000_000, 100, 6000)
    }

    pub fn coder() -> Self {
        Self::default()
    }

    pub fn summarizer() -> Self {
        Self::new(25, 600_000, 120, 3000)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl Default for Budgets {
    fn default() -> Self {
        Self::new(50, 200_000, 100, 300)
    }
}

/// Partial override of a [`Budgets`] value, e.g. from a job description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOverrides {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_tool_calls: Option<u64>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl BudgetOverrides {
    pub fn apply(&self, base: Budgets) -> Budgets {
        Budgets {
            max_iterations: self.max_iterations.unwrap_or(base.max_iterations),
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            max_tool_calls: self.max_tool_calls.unwrap_or(base.max_tool_calls),
            max_duration_secs: self.max_duration_secs.unwrap_or(base.max_duration_secs),
        }
    }
}
