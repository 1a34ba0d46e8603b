//! Daytona REST client.
//!
//! Sandboxes are created through the control-plane API; file, git and process
//! operations go through the per-sandbox toolbox endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    EnvironmentSpec, ExecResponse, FileEntry, GitStatus, Language, Sandbox, SandboxError,
    SandboxHandle, SandboxProvider, SandboxState, SearchMatch, REPO_DIR,
};

const START_TIMEOUT: Duration = Duration::from_secs(120);
const START_POLL: Duration = Duration::from_millis(500);
const START_POLL_MAX: Duration = Duration::from_secs(5);

/// Poll `state()` until the sandbox reports `Started`. The poll interval
/// doubles up to [`START_POLL_MAX`]. An `Error` state or passing `timeout`
/// fails with [`SandboxError::Operation`].
pub async fn wait_until_started(
    sandbox: &dyn Sandbox,
    timeout: Duration,
    poll: Duration,
) -> Result<(), SandboxError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut delay = poll;
    loop {
        match sandbox.state().await? {
            SandboxState::Started => return Ok(()),
            SandboxState::Error => {
                return Err(SandboxError::Operation(format!(
                    "sandbox {} entered error state while starting",
                    sandbox.id()
                )))
            }
            state => {
                tracing::debug!(sandbox_id = %sandbox.id(), ?state, "Waiting for sandbox to start");
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(SandboxError::Operation(format!(
                "sandbox {} did not start within {}s",
                sandbox.id(),
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(START_POLL_MAX);
    }
}

/// Connection settings for the Daytona API.
#[derive(Debug, Clone)]
pub struct DaytonaConfig {
    pub api_key: String,
    pub api_url: String,
    pub target: String,
}

/// Credentials used for clone/push/pull inside the sandbox.
#[derive(Debug, Clone)]
pub struct GitCredentials {
    pub username: String,
    pub password: Option<String>,
}

impl Default for GitCredentials {
    fn default() -> Self {
        Self {
            username: "git".to_string(),
            password: None,
        }
    }
}

struct DaytonaApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl DaytonaApi {
    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, SandboxError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(SandboxError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, SandboxError> {
        let text = self.send(builder).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| SandboxError::InvalidResponse(format!("{}: {}", e, text)))
    }
}

/// Creates sandboxes on Daytona.
pub struct DaytonaProvider {
    api: Arc<DaytonaApi>,
    target: String,
    credentials: GitCredentials,
}

impl DaytonaProvider {
    pub fn new(config: DaytonaConfig, credentials: GitCredentials) -> Self {
        Self {
            api: Arc::new(DaytonaApi {
                client: Client::new(),
                base_url: config.api_url.trim_end_matches('/').to_string(),
                api_key: config.api_key,
            }),
            target: config.target,
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SandboxInfo {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

#[async_trait]
impl SandboxProvider for DaytonaProvider {
    async fn create(
        &self,
        name: &str,
        spec: &EnvironmentSpec,
    ) -> Result<SandboxHandle, SandboxError> {
        let body = json!({
            "name": name,
            "target": self.target,
            "labels": { "code-toolbox-language": spec.language.as_str() },
            "cpu": 2,
            "memory": 4,
            "disk": 2,
            "autoStopInterval": 15,
            "autoDeleteInterval": -1,
            "ephemeral": false,
        });
        let info: SandboxInfo = self
            .api
            .send_json(self.api.request(reqwest::Method::POST, "/sandbox").json(&body))
            .await?;
        tracing::debug!(sandbox_id = %info.id, state = ?info.state, "Daytona sandbox created");

        let sandbox = DaytonaSandbox {
            id: info.id,
            api: self.api.clone(),
            credentials: self.credentials.clone(),
        };

        let ready = async {
            wait_until_started(&sandbox, START_TIMEOUT, START_POLL).await?;
            if let Some(url) = spec.repository_url.as_deref() {
                sandbox
                    .git_clone(url, REPO_DIR, spec.branch.as_deref())
                    .await?;
            }
            Ok::<_, SandboxError>(())
        };
        if let Err(e) = ready.await {
            // The caller never sees this sandbox, so it must not outlive the error.
            if let Err(cleanup) = sandbox.delete().await {
                tracing::error!(sandbox_id = %sandbox.id, "Error deleting sandbox after failed setup: {}", cleanup);
            }
            return Err(e);
        }

        Ok(Arc::new(sandbox))
    }
}

/// A sandbox living on Daytona.
pub struct DaytonaSandbox {
    id: String,
    api: Arc<DaytonaApi>,
    credentials: GitCredentials,
}

impl DaytonaSandbox {
    fn toolbox(&self, path: &str) -> String {
        format!("/toolbox/{}/toolbox{}", self.id, path)
    }

    async fn toolbox_post(&self, path: &str, body: Value) -> Result<(), SandboxError> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::POST, &self.toolbox(path))
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    fn credential_fields(&self) -> Value {
        json!({
            "username": self.credentials.username,
            "password": self.credentials.password,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaytonaFileInfo {
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    mod_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaytonaGitStatus {
    #[serde(default)]
    current_branch: String,
    #[serde(default)]
    ahead: u64,
    #[serde(default)]
    behind: u64,
    #[serde(default)]
    file_status: Vec<DaytonaFileStatus>,
}

#[derive(Debug, Deserialize)]
struct DaytonaFileStatus {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DaytonaBranches {
    #[serde(default)]
    branches: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaytonaExecResponse {
    exit_code: i64,
    #[serde(default)]
    result: String,
}

#[async_trait]
impl Sandbox for DaytonaSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState, SandboxError> {
        let info: SandboxInfo = self
            .api
            .send_json(
                self.api
                    .request(reqwest::Method::GET, &format!("/sandbox/{}", self.id)),
            )
            .await?;
        Ok(info
            .state
            .as_deref()
            .map(SandboxState::parse)
            .unwrap_or(SandboxState::Unknown))
    }

    async fn start(&self) -> Result<(), SandboxError> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::POST, &format!("/sandbox/{}/start", self.id)),
            )
            .await?;
        wait_until_started(self, START_TIMEOUT, START_POLL).await
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::POST, &format!("/sandbox/{}/stop", self.id)),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), SandboxError> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::DELETE, &format!("/sandbox/{}", self.id)),
            )
            .await?;
        Ok(())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let resp = self
            .api
            .send(
                self.api
                    .request(reqwest::Method::GET, &self.toolbox("/files/download"))
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
        let files: Vec<DaytonaFileInfo> = self
            .api
            .send_json(
                self.api
                    .request(reqwest::Method::GET, &self.toolbox("/files"))
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(files
            .into_iter()
            .map(|f| FileEntry {
                name: f.name,
                is_dir: f.is_dir,
                size: f.size,
                modified: f.mod_time,
            })
            .collect())
    }

    async fn find_files(
        &self,
        path: &str,
        pattern: &str,
    ) -> Result<Vec<SearchMatch>, SandboxError> {
        self.api
            .send_json(
                self.api
                    .request(reqwest::Method::GET, &self.toolbox("/files/find"))
                    .query(&[("path", path), ("pattern", pattern)]),
            )
            .await
    }

    async fn replace_in_files(
        &self,
        files: &[String],
        pattern: &str,
        new_value: &str,
    ) -> Result<(), SandboxError> {
        self.toolbox_post(
            "/files/replace",
            json!({ "files": files, "pattern": pattern, "newValue": new_value }),
        )
        .await
    }

    async fn upload_file(&self, path: &str, content: Vec<u8>) -> Result<(), SandboxError> {
        let part = reqwest::multipart::Part::bytes(content).file_name(path.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        self.api
            .send(
                self.api
                    .request(reqwest::Method::POST, &self.toolbox("/files/upload"))
                    .query(&[("path", path)])
                    .multipart(form),
            )
            .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), SandboxError> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::DELETE, &self.toolbox("/files"))
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(())
    }

    async fn git_status(&self, path: &str) -> Result<GitStatus, SandboxError> {
        let status: DaytonaGitStatus = self
            .api
            .send_json(
                self.api
                    .request(reqwest::Method::GET, &self.toolbox("/git/status"))
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(GitStatus {
            current_branch: status.current_branch,
            ahead: status.ahead,
            behind: status.behind,
            modified_files: status.file_status.into_iter().map(|f| f.name).collect(),
        })
    }

    async fn git_branches(&self, path: &str) -> Result<Vec<String>, SandboxError> {
        let branches: DaytonaBranches = self
            .api
            .send_json(
                self.api
                    .request(reqwest::Method::GET, &self.toolbox("/git/branches"))
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(branches.branches)
    }

    async fn git_create_branch(&self, path: &str, name: &str) -> Result<(), SandboxError> {
        self.toolbox_post("/git/branches", json!({ "path": path, "name": name }))
            .await
    }

    async fn git_checkout_branch(&self, path: &str, name: &str) -> Result<(), SandboxError> {
        self.toolbox_post("/git/checkout", json!({ "path": path, "branch": name }))
            .await
    }

    async fn git_add(&self, path: &str, files: &[String]) -> Result<(), SandboxError> {
        self.toolbox_post("/git/add", json!({ "path": path, "files": files }))
            .await
    }

    async fn git_commit(
        &self,
        path: &str,
        message: &str,
        author: &str,
        email: &str,
    ) -> Result<(), SandboxError> {
        self.toolbox_post(
            "/git/commit",
            json!({ "path": path, "message": message, "author": author, "email": email }),
        )
        .await
    }

    async fn git_push(&self, path: &str) -> Result<(), SandboxError> {
        let mut body = self.credential_fields();
        body["path"] = json!(path);
        self.toolbox_post("/git/push", body).await
    }

    async fn git_pull(&self, path: &str) -> Result<(), SandboxError> {
        let mut body = self.credential_fields();
        body["path"] = json!(path);
        self.toolbox_post("/git/pull", body).await
    }

    async fn git_clone(
        &self,
        url: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<(), SandboxError> {
        let mut body = self.credential_fields();
        body["url"] = json!(url);
        body["path"] = json!(path);
        body["branch"] = json!(branch);
        self.toolbox_post("/git/clone", body).await
    }

    async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError> {
        let body = json!({
            "command": command,
            "cwd": cwd,
            "timeout": timeout.map(|t| t.as_secs()),
        });
        let resp: DaytonaExecResponse = self
            .api
            .send_json(
                self.api
                    .request(reqwest::Method::POST, &self.toolbox("/process/execute"))
                    .json(&body),
            )
            .await?;
        Ok(ExecResponse {
            exit_code: resp.exit_code,
            result: resp.result,
        })
    }

    async fn code_run(
        &self,
        code: &str,
        language: Language,
        timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError> {
        self.exec(&code_run_command(code, language), None, timeout)
            .await
    }
}

/// Shell command that decodes `code` and feeds it to the language runtime.
fn code_run_command(code: &str, language: Language) -> String {
    let encoded = BASE64.encode(code.as_bytes());
    match language {
        Language::Python => format!("sh -c \"echo '{}' | base64 -d | python3 -u -\"", encoded),
        Language::Typescript => format!(
            "sh -c \"echo '{}' | base64 -d > /tmp/run_code.ts && npx ts-node -T /tmp/run_code.ts\"",
            encoded
        ),
        Language::Javascript => format!("sh -c \"echo '{}' | base64 -d | node -\"", encoded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeSandbox;

    #[tokio::test]
    async fn waits_through_transitional_states() {
        let sandbox = FakeSandbox::new("sb-1");
        sandbox.report_states(&[
            SandboxState::Creating,
            SandboxState::Starting,
            SandboxState::Started,
        ]);
        wait_until_started(&sandbox, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(sandbox.current_state(), SandboxState::Started);
    }

    #[tokio::test]
    async fn error_state_fails_the_wait() {
        let sandbox = FakeSandbox::new("sb-1");
        sandbox.report_states(&[SandboxState::Starting, SandboxState::Error]);
        let err = wait_until_started(&sandbox, Duration::from_secs(5), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Operation(ref m) if m.contains("error state")));
    }

    #[tokio::test]
    async fn a_sandbox_that_never_starts_times_out() {
        let sandbox = FakeSandbox::new("sb-1");
        sandbox.report_states(&[SandboxState::Starting]);
        let err = wait_until_started(&sandbox, Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Operation(ref m) if m.contains("did not start")));
    }

    #[test]
    fn code_is_shipped_base64_encoded() {
        let cmd = code_run_command("print(\"hi\")\n", Language::Python);
        let encoded = BASE64.encode("print(\"hi\")\n");
        assert!(cmd.contains(&encoded));
        assert!(cmd.ends_with("python3 -u -\""));
        assert!(!cmd.contains("print("));
    }

    #[test]
    fn toolbox_paths_are_scoped_to_sandbox() {
        let sandbox = DaytonaSandbox {
            id: "sb-1".to_string(),
            api: Arc::new(DaytonaApi {
                client: Client::new(),
                base_url: "https://daytona.example/api".to_string(),
                api_key: "k".to_string(),
            }),
            credentials: GitCredentials::default(),
        };
        assert_eq!(sandbox.toolbox("/git/status"), "/toolbox/sb-1/toolbox/git/status");
        assert_eq!(sandbox.credential_fields()["username"], "git");
        assert!(sandbox.credential_fields()["password"].is_null());
    }

    #[test]
    fn git_status_maps_file_names() {
        let raw: DaytonaGitStatus = serde_json::from_value(json!({
            "currentBranch": "feature",
            "ahead": 2,
            "behind": 0,
            "fileStatus": [{"name": "src/lib.rs", "staging": "M"}]
        }))
        .unwrap();
        assert_eq!(raw.current_branch, "feature");
        assert_eq!(raw.file_status[0].name, "src/lib.rs");
    }
}
