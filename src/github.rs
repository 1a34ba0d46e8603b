//! GitHub pull request review comments.
//!
//! The reviewer posts findings through a [`ReviewPoster`]; the production
//! implementation talks to the GitHub REST API with a token.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "metis-agents";

/// Errors from posting a review comment.
#[derive(Debug, thiserror::Error)]
pub enum PostingError {
    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid GitHub response: {0}")]
    InvalidResponse(String),
}

/// The pull request a review comments on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    /// Head commit the comments are anchored to.
    pub commit_sha: String,
}

/// A comment anchored to one line, or a range ending at `line`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineComment {
    pub path: String,
    pub line: u64,
    pub start_line: Option<u64>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PostedComment {
    pub id: Option<i64>,
}

#[async_trait]
pub trait ReviewPoster: Send + Sync {
    async fn post_inline_comment(
        &self,
        target: &PullRequestRef,
        comment: &InlineComment,
    ) -> Result<PostedComment, PostingError>;

    async fn post_file_comment(
        &self,
        target: &PullRequestRef,
        path: &str,
        body: &str,
    ) -> Result<PostedComment, PostingError>;
}

/// GitHub REST client for pull request review comments.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn comments_url(&self, target: &PullRequestRef) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}/comments",
            self.api_url, target.owner, target.repo, target.pr_number
        )
    }

    async fn create_comment(
        &self,
        target: &PullRequestRef,
        body: Value,
    ) -> Result<PostedComment, PostingError> {
        let resp = self
            .client
            .post(self.comments_url(target))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(PostingError::Api {
                status: status.as_u16(),
                message: text,
            });
        }

        #[derive(Deserialize)]
        struct Created {
            id: Option<i64>,
        }

        let created: Created = serde_json::from_str(&text)
            .map_err(|e| PostingError::InvalidResponse(e.to_string()))?;
        Ok(PostedComment { id: created.id })
    }
}

pub(crate) fn inline_comment_body(target: &PullRequestRef, comment: &InlineComment) -> Value {
    let mut body = json!({
        "body": comment.body,
        "commit_id": target.commit_sha,
        "path": comment.path,
        "line": comment.line,
        "side": "RIGHT",
    });
    if let Some(start) = comment.start_line.filter(|s| *s < comment.line) {
        body["start_line"] = json!(start);
        body["start_side"] = json!("RIGHT");
    }
    body
}

pub(crate) fn file_comment_body(target: &PullRequestRef, path: &str, body: &str) -> Value {
    json!({
        "body": body,
        "commit_id": target.commit_sha,
        "path": path,
        "subject_type": "file",
    })
}

#[async_trait]
impl ReviewPoster for GitHubClient {
    async fn post_inline_comment(
        &self,
        target: &PullRequestRef,
        comment: &InlineComment,
    ) -> Result<PostedComment, PostingError> {
        tracing::debug!(
            pr = target.pr_number,
            path = %comment.path,
            line = comment.line,
            "Posting inline review comment"
        );
        self.create_comment(target, inline_comment_body(target, comment))
            .await
    }

    async fn post_file_comment(
        &self,
        target: &PullRequestRef,
        path: &str,
        body: &str,
    ) -> Result<PostedComment, PostingError> {
        tracing::debug!(pr = target.pr_number, path = %path, "Posting file review comment");
        self.create_comment(target, file_comment_body(target, path, body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> PullRequestRef {
        PullRequestRef {
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            pr_number: 42,
            commit_sha: "abc123".to_string(),
        }
    }

    #[test]
    fn comments_url_is_trimmed() {
        let client = GitHubClient::new("https://api.github.com/", "t");
        assert_eq!(
            client.comments_url(&target()),
            "https://api.github.com/repos/acme/widgets/pulls/42/comments"
        );
    }

    #[test]
    fn range_comment_sets_start_line() {
        let comment = InlineComment {
            path: "src/lib.rs".to_string(),
            line: 20,
            start_line: Some(12),
            body: "x".to_string(),
        };
        let body = inline_comment_body(&target(), &comment);
        assert_eq!(body["line"], 20);
        assert_eq!(body["start_line"], 12);
        assert_eq!(body["start_side"], "RIGHT");
        assert_eq!(body["commit_id"], "abc123");
    }

    #[test]
    fn single_line_comment_has_no_range() {
        let comment = InlineComment {
            path: "a.py".to_string(),
            line: 3,
            start_line: Some(3),
            body: "x".to_string(),
        };
        let body = inline_comment_body(&target(), &comment);
        assert!(body.get("start_line").is_none());

        let file = file_comment_body(&target(), "a.py", "y");
        assert_eq!(file["subject_type"], "file");
    }
}
