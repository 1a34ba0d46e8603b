//! Durable record of posted review findings.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for tests and dry runs)
//! - `sqlite`: SQLite database file
//!
//! Both backends accept concurrent writes from the tool invocations of one batch.

mod memory;
mod sqlite;

pub use memory::InMemoryFindingStore;
pub use sqlite::SqliteFindingStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Errors from a finding store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One review finding as persisted after it was posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingRecord {
    pub review_id: String,
    pub file_path: String,
    /// First line of the finding; file-level findings use line 1.
    pub line_number: u64,
    pub line_end: Option<u64>,
    pub comment_text: String,
    pub severity: String,
    pub category: String,
    pub github_comment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Whether records survive a process restart.
    fn is_persistent(&self) -> bool;

    /// Persist a record, returning its storage id.
    async fn insert(&self, record: FindingRecord) -> Result<i64, StoreError>;

    /// All findings of one review, oldest first.
    async fn list_for_review(&self, review_id: &str) -> Result<Vec<FindingRecord>, StoreError>;
}

#[cfg(test)]
pub(crate) fn sample_record(review_id: &str, line: u64) -> FindingRecord {
    FindingRecord {
        review_id: review_id.to_string(),
        file_path: "src/lib.rs".to_string(),
        line_number: line,
        line_end: None,
        comment_text: "**[WARNING][BUG]** off by one".to_string(),
        severity: "WARNING".to_string(),
        category: "BUG".to_string(),
        github_comment_id: Some(1000 + line as i64),
        created_at: Utc::now(),
    }
}
