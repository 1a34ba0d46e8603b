//! SQLite-backed finding store.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use super::{FindingRecord, FindingStore, StoreError};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS review_findings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    review_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    line_number INTEGER NOT NULL,
    line_end INTEGER,
    comment_text TEXT NOT NULL,
    severity TEXT NOT NULL,
    category TEXT NOT NULL,
    github_comment_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_findings_review ON review_findings(review_id, id);
"#;

pub struct SqliteFindingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteFindingStore {
    /// Open (or create) the database at `db_path`.
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        tracing::debug!("Finding store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl FindingStore for SqliteFindingStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn insert(&self, record: FindingRecord) -> Result<i64, StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO review_findings (review_id, file_path, line_number, line_end,
                        comment_text, severity, category, github_comment_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.review_id,
                    record.file_path,
                    record.line_number as i64,
                    record.line_end.map(|l| l as i64),
                    record.comment_text,
                    record.severity,
                    record.category,
                    record.github_comment_id,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok::<_, StoreError>(conn.last_insert_rowid())
        })
        .await?
    }

    async fn list_for_review(&self, review_id: &str) -> Result<Vec<FindingRecord>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let review_id = review_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(
                "SELECT review_id, file_path, line_number, line_end, comment_text, severity,
                        category, github_comment_id, created_at
                 FROM review_findings WHERE review_id = ?1 ORDER BY id ASC",
            )?;
            let records = stmt
                .query_map(params![review_id], |row| {
                    let line_number: i64 = row.get(2)?;
                    let line_end: Option<i64> = row.get(3)?;
                    let created_at: String = row.get(8)?;
                    Ok(FindingRecord {
                        review_id: row.get(0)?,
                        file_path: row.get(1)?,
                        line_number: line_number.max(0) as u64,
                        line_end: line_end.map(|l| l.max(0) as u64),
                        comment_text: row.get(4)?,
                        severity: row.get(5)?,
                        category: row.get(6)?,
                        github_comment_id: row.get(7)?,
                        created_at: DateTime::parse_from_rfc3339(&created_at)
                            .map(|t| t.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(records)
        })
        .await?
    }
}
