//! Configuration management for the agent worker.
//!
//! Configuration can be set via environment variables:
//! - `PROVIDER_API_KEY` - Required. API key for the chat-completion provider.
//! - `PROVIDER_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://api.openai.com/v1`.
//! - `MODEL_NAME` - Optional. Model identifier. Defaults to `gpt-4.1`.
//! - `DAYTONA_API_KEY` - Required. Sandbox service API key.
//! - `DAYTONA_API_URL` - Optional. Defaults to `https://app.daytona.io/api`.
//! - `DAYTONA_TARGET` - Optional. Sandbox region. Defaults to `us`.
//! - `GIT_USERNAME` - Optional. Username for clone/push inside sandboxes. Defaults to `git`.
//! - `GIT_TOKEN` - Optional. Token for clone/push inside sandboxes.
//! - `GITHUB_TOKEN` - Optional. Needed by review jobs that post findings.
//! - `GITHUB_API_URL` - Optional. Defaults to `https://api.github.com`.
//! - `FINDINGS_DB_PATH` - Optional. SQLite file for posted findings; in-memory when unset.
//! - `LLM_MAX_RETRIES` - Optional. Retries for transient provider errors. Defaults to `3`.

use std::path::PathBuf;
use thiserror::Error;

use crate::agents::AgentKind;
use crate::budget::Budgets;
use crate::llm::RetryConfig;
use crate::sandbox::{DaytonaConfig, GitCredentials};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Chat-completion provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub retry: RetryConfig,
}

/// GitHub API settings.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub api_url: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

/// Default budgets for each agent archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentBudgets {
    pub reviewer: Budgets,
    pub coder: Budgets,
    pub summarizer: Budgets,
}

impl Default for AgentBudgets {
    fn default() -> Self {
        Self {
            reviewer: AgentKind::Reviewer.default_budgets(),
            coder: AgentKind::Coder.default_budgets(),
            summarizer: AgentKind::Summarizer.default_budgets(),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,

    pub daytona: DaytonaConfig,

    /// Credentials for git operations inside sandboxes
    pub git: GitCredentials,

    pub github: GitHubConfig,

    /// Where posted findings are recorded (in-memory when `None`)
    pub findings_db_path: Option<PathBuf>,

    pub budgets: AgentBudgets,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `PROVIDER_API_KEY` or
    /// `DAYTONA_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let max_retries = match get("LLM_MAX_RETRIES") {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("LLM_MAX_RETRIES".to_string(), format!("{}", e))
            })?,
            None => RetryConfig::default().max_retries,
        };

        let llm = LlmConfig {
            api_key: required("PROVIDER_API_KEY")?,
            base_url: or_default("PROVIDER_BASE_URL", "https://api.openai.com/v1"),
            model: or_default("MODEL_NAME", "gpt-4.1"),
            retry: RetryConfig {
                max_retries,
                ..RetryConfig::default()
            },
        };

        let daytona = DaytonaConfig {
            api_key: required("DAYTONA_API_KEY")?,
            api_url: or_default("DAYTONA_API_URL", "https://app.daytona.io/api"),
            target: or_default("DAYTONA_TARGET", "us"),
        };

        let git = GitCredentials {
            username: or_default("GIT_USERNAME", "git"),
            password: get("GIT_TOKEN").filter(|v| !v.is_empty()),
        };

        let github = GitHubConfig {
            token: get("GITHUB_TOKEN").filter(|v| !v.is_empty()),
            api_url: or_default("GITHUB_API_URL", "https://api.github.com"),
        };

        Ok(Self {
            llm,
            daytona,
            git,
            github,
            findings_db_path: get("FINDINGS_DB_PATH").map(PathBuf::from),
            budgets: AgentBudgets::default(),
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, daytona_api_key: String) -> Self {
        Self {
            llm: LlmConfig {
                api_key,
                base_url: "https://api.openai.com/v1".to_string(),
                model,
                retry: RetryConfig::default(),
            },
            daytona: DaytonaConfig {
                api_key: daytona_api_key,
                api_url: "https://app.daytona.io/api".to_string(),
                target: "us".to_string(),
            },
            git: GitCredentials::default(),
            github: GitHubConfig::default(),
            findings_db_path: None,
            budgets: AgentBudgets::default(),
        }
    }
}
