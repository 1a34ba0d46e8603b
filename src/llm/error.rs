//! Failures of a chat-completions call, split into the ones worth another
//! attempt and the ones that will fail the same way again.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A failed completion request.
///
/// `message` is the provider's own error text when the body carries one, so
/// it can be surfaced to the run's error unchanged.
#[derive(Debug, Error)]
#[error("{kind}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status: Option<u16>,
    pub message: String,
    /// Delay requested by the provider through `Retry-After`.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LlmErrorKind {
    #[error("rate limited")]
    RateLimited,
    #[error("provider unavailable")]
    Unavailable,
    /// The transcript no longer fits the model's context window.
    #[error("context window exceeded")]
    ContextOverflow,
    #[error("request rejected")]
    Rejected,
    #[error("network failure")]
    Network,
    #[error("malformed response")]
    Malformed,
}

impl LlmErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable | Self::Network)
    }
}

impl LlmError {
    /// Build the error for a non-2xx completion response.
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let (message, code) = provider_message(body);
        let kind = match status {
            429 => LlmErrorKind::RateLimited,
            413 => LlmErrorKind::ContextOverflow,
            400..=499 if is_context_overflow(code.as_deref(), &message) => {
                LlmErrorKind::ContextOverflow
            }
            400..=499 => LlmErrorKind::Rejected,
            _ => LlmErrorKind::Unavailable,
        };
        Self {
            kind,
            status: Some(status),
            message,
            retry_after: retry_after.filter(|_| kind == LlmErrorKind::RateLimited),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::without_status(LlmErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::without_status(LlmErrorKind::Malformed, message)
    }

    fn without_status(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Wait before retry number `attempt + 1`: the provider's `Retry-After`
    /// when given, otherwise doubling from 5s for rate limits and 1s for
    /// anything else. Never more than a minute.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if let Some(requested) = self.retry_after {
            return requested.min(MAX_BACKOFF);
        }
        let base = match self.kind {
            LlmErrorKind::RateLimited => Duration::from_secs(5),
            _ => Duration::from_secs(1),
        };
        base.saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

/// Bounds on retrying transient failures of one completion call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Total time budget for one call including all retries.
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    /// Whether a call that has already been retried `attempt` times should
    /// go again after `error`.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ProviderError,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderError {
    Detailed {
        message: String,
        #[serde(default)]
        code: Option<serde_json::Value>,
    },
    Plain(String),
}

/// The provider's error message and code, falling back to the raw body.
fn provider_message(body: &str) -> (String, Option<String>) {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ProviderError::Detailed { message, code },
        }) => {
            let code = code.map(|c| match c {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
            (message, code)
        }
        Ok(ErrorEnvelope {
            error: ProviderError::Plain(message),
        }) => (message, None),
        Err(_) => (body.trim().to_string(), None),
    }
}

fn is_context_overflow(code: Option<&str>, message: &str) -> bool {
    if code == Some("context_length_exceeded") {
        return true;
    }
    let message = message.to_ascii_lowercase();
    message.contains("context_length_exceeded")
        || message.contains("maximum context length")
        || message.contains("context window")
}
