//! # Metis Agents
//!
//! Bounded autonomous agents for pull-request work: code review, issue-to-PR
//! coding and PR summaries.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────┐   acquire    ┌────────────────┐
//!   │ JobRunner├─────────────►│ SandboxManager │
//!   └────┬─────┘              └────────────────┘
//!        │ run
//!        ▼
//!   ┌──────────┐  enforce  ┌───────────────────┐
//!   │ AgentLoop├──────────►│ TerminationPolicy │
//!   └────┬─────┘           └───────────────────┘
//!        │ step
//!        ▼
//!   ┌──────────┐  chat     ┌───────────┐
//!   │  Agent   ├──────────►│ LlmClient │
//!   └────┬─────┘           └───────────┘
//!        │ dispatch_batch
//!        ▼
//!   ┌──────────────┐
//!   │ ToolRegistry │──► sandbox, GitHub, finding store
//!   └──────────────┘
//! ```
//!
//! ## Run Flow
//! 1. Acquire a sandbox with the repository cloned
//! 2. Alternate policy checks and agent steps until a completion tool is
//!    called, a budget is exhausted, or a step fails
//! 3. Release the sandbox and check the result for the archetype's fields
//!
//! ## Modules
//! - `agents`: conversation state, agent step logic and the execution loop
//! - `budget`: budgets and the termination policy
//! - `tools`: tool trait, registry and the per-archetype tool sets
//! - `sandbox`: remote environment trait, Daytona client and lifecycle manager
//! - `llm`: OpenAI-compatible chat client
//! - `github` / `store`: where review findings are posted and recorded
//! - `jobs`: review, coding and summary flows

pub mod agents;
pub mod budget;
pub mod config;
pub mod github;
pub mod jobs;
pub mod llm;
pub mod sandbox;
pub mod store;
pub mod tools;

#[cfg(test)]
mod test_support;
