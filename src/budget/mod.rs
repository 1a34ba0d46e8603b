//! Budget module - resource ceilings and the termination policy.
//!
//! # Key Concepts
//! - Budgets: per-run ceilings on iterations, tokens, tool calls and wall time
//! - TerminationPolicy: stops an over-budget run regardless of what the agent wants

mod budget;
mod policy;

pub use budget::{BudgetOverrides, Budgets};
pub use policy::{LimitReason, PolicyDecision, TerminationPolicy};
