//! metis-worker - runs one agent job.
//!
//! Reads a job description (JSON) from stdin, runs it to completion and
//! prints the report (checked outcome plus terminal conversation state) as
//! JSON on stdout. Logs go to stderr.

use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use metis_agents::config::Config;
use metis_agents::github::GitHubClient;
use metis_agents::jobs::{Job, JobRunner};
use metis_agents::llm::OpenAiCompatibleClient;
use metis_agents::sandbox::{DaytonaProvider, SandboxManager};
use metis_agents::store::{FindingStore, InMemoryFindingStore, SqliteFindingStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metis_agents=debug,metis_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration: model={}", config.llm.model);

    let job = read_job()?;
    info!(task_id = job.task_id(), "Job received");

    let llm = Arc::new(OpenAiCompatibleClient::with_retry_config(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.retry.clone(),
    ));
    let provider = Arc::new(DaytonaProvider::new(
        config.daytona.clone(),
        config.git.clone(),
    ));
    let sandboxes = Arc::new(SandboxManager::new(provider));

    let store: Arc<dyn FindingStore> = match &config.findings_db_path {
        Some(path) => Arc::new(SqliteFindingStore::open(path.clone()).await?),
        None => Arc::new(InMemoryFindingStore::new()),
    };
    if !store.is_persistent() {
        warn!("FINDINGS_DB_PATH not set; posted findings are kept in memory only");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current iteration");
            ctrl_c.cancel();
        }
    });

    let mut runner = JobRunner::new(llm, config.llm.model.clone(), sandboxes, store)
        .with_budgets(config.budgets)
        .with_cancellation(cancel);
    if let Some(token) = &config.github.token {
        runner = runner.with_poster(Arc::new(GitHubClient::new(&config.github.api_url, token)));
    }

    let report = runner.run(&job).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.outcome.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Parse the job from stdin, generating a task id when it has none.
fn read_job() -> anyhow::Result<Job> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read job from stdin")?;

    let mut value: serde_json::Value =
        serde_json::from_str(&raw).context("Job is not valid JSON")?;
    if let Some(obj) = value.as_object_mut() {
        let has_id = obj
            .get("task_id")
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty());
        if !has_id {
            obj.insert(
                "task_id".to_string(),
                uuid::Uuid::new_v4().to_string().into(),
            );
        }
    }
    serde_json::from_value(value).context("Job does not match any known kind")
}
