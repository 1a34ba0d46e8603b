//! In-memory collaborators for unit tests: a scripted model, a fake sandbox
//! and provider, and a review poster that records what it was asked to post.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::github::{InlineComment, PostedComment, PostingError, PullRequestRef, ReviewPoster};
use crate::llm::{
    ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage, ToolCall, ToolDefinition,
};
use crate::sandbox::{
    EnvironmentSpec, ExecResponse, FileEntry, GitStatus, Language, Sandbox, SandboxError,
    SandboxHandle, SandboxProvider, SandboxState, SearchMatch,
};

// ============================================================================
// Scripted model
// ============================================================================

/// One scripted model turn.
pub enum Scripted {
    Reply(ChatResponse),
    Fail(String),
    Panic(String),
}

/// A plain text answer reporting 15 tokens.
pub fn text_reply(content: &str) -> Scripted {
    Scripted::Reply(ChatResponse {
        content: Some(content.to_string()),
        finish_reason: Some("stop".to_string()),
        usage: Some(TokenUsage::new(10, 5)),
        ..Default::default()
    })
}

/// A tool-calling answer reporting 120 tokens.
pub fn tool_reply(calls: Vec<ToolCall>) -> Scripted {
    Scripted::Reply(ChatResponse {
        tool_calls: Some(calls),
        finish_reason: Some("tool_calls".to_string()),
        usage: Some(TokenUsage::new(100, 20)),
        ..Default::default()
    })
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
    pub options: ChatOptions,
}

/// Replays scripted turns in order; once the script runs out it keeps
/// answering with text and never calls a tool.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, tools, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            tool_names: tools
                .unwrap_or_default()
                .iter()
                .map(|t| t.function.name.clone())
                .collect(),
            options,
        });

        let next = self.script.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| text_reply("Still working.")) {
            Scripted::Reply(response) => Ok(response),
            Scripted::Fail(message) => Err(anyhow::anyhow!(message)),
            Scripted::Panic(message) => panic!("{}", message),
        }
    }
}

// ============================================================================
// Fake sandbox
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCall {
    pub command: String,
    pub cwd: Option<String>,
    pub timeout: Option<Duration>,
}

struct SandboxInner {
    state: SandboxState,
    upcoming_states: VecDeque<SandboxState>,
    files: BTreeMap<String, Vec<u8>>,
    branches: Vec<String>,
    current_branch: String,
    staged: Vec<String>,
    commits: Vec<(String, String, String)>,
    pushes: usize,
    clones: Vec<(String, String, Option<String>)>,
    commands: Vec<ExecCall>,
    code_runs: Vec<(String, Language)>,
    exec_response: (i64, String),
    git_failure: Option<String>,
    fail_delete: bool,
    start_calls: usize,
    delete_calls: usize,
}

/// A sandbox whose filesystem and git repository live in memory.
pub struct FakeSandbox {
    id: String,
    inner: Mutex<SandboxInner>,
}

impl FakeSandbox {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            inner: Mutex::new(SandboxInner {
                state: SandboxState::Started,
                upcoming_states: VecDeque::new(),
                files: BTreeMap::new(),
                branches: vec!["main".to_string()],
                current_branch: "main".to_string(),
                staged: Vec::new(),
                commits: Vec::new(),
                pushes: 0,
                clones: Vec::new(),
                commands: Vec::new(),
                code_runs: Vec::new(),
                exec_response: (0, String::new()),
                git_failure: None,
                fail_delete: false,
                start_calls: 0,
                delete_calls: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SandboxInner> {
        self.inner.lock().unwrap()
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.lock()
            .files
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn commits(&self) -> Vec<(String, String, String)> {
        self.lock().commits.clone()
    }

    pub fn pushes(&self) -> usize {
        self.lock().pushes
    }

    pub fn clones(&self) -> Vec<(String, String, Option<String>)> {
        self.lock().clones.clone()
    }

    pub fn commands(&self) -> Vec<ExecCall> {
        self.lock().commands.clone()
    }

    pub fn code_runs(&self) -> Vec<(String, Language)> {
        self.lock().code_runs.clone()
    }

    /// Response for every subsequent `exec` and `code_run`.
    pub fn set_exec_response(&self, exit_code: i64, result: &str) {
        self.lock().exec_response = (exit_code, result.to_string());
    }

    /// Make every git operation fail with `message`.
    pub fn fail_git(&self, message: &str) {
        self.lock().git_failure = Some(message.to_string());
    }

    pub fn fail_deletes(&self) {
        self.lock().fail_delete = true;
    }

    /// States reported by the next `state()` calls, one per call. The last
    /// one sticks.
    pub fn report_states(&self, states: &[SandboxState]) {
        self.lock().upcoming_states.extend(states.iter().copied());
    }

    pub fn current_state(&self) -> SandboxState {
        self.lock().state
    }

    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    fn git_guard(&self) -> Result<std::sync::MutexGuard<'_, SandboxInner>, SandboxError> {
        let inner = self.lock();
        if let Some(message) = inner.git_failure.clone() {
            return Err(SandboxError::Operation(message));
        }
        Ok(inner)
    }

    fn exec_result(inner: &SandboxInner) -> ExecResponse {
        ExecResponse {
            exit_code: inner.exec_response.0,
            result: inner.exec_response.1.clone(),
        }
    }
}

fn under(dir: &str, path: &str) -> Option<String> {
    let prefix = format!("{}/", dir.trim_end_matches('/'));
    path.strip_prefix(&prefix).map(str::to_string)
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn state(&self) -> Result<SandboxState, SandboxError> {
        let mut inner = self.lock();
        if let Some(next) = inner.upcoming_states.pop_front() {
            inner.state = next;
        }
        Ok(inner.state)
    }

    async fn start(&self) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        inner.start_calls += 1;
        inner.state = SandboxState::Started;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SandboxError> {
        self.lock().state = SandboxState::Stopped;
        Ok(())
    }

    async fn delete(&self) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        inner.delete_calls += 1;
        if inner.fail_delete {
            return Err(SandboxError::Operation("delete failed".to_string()));
        }
        Ok(())
    }

    async fn download_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::Operation(format!("File not found: {}", path)))
    }

    async fn list_files(&self, path: &str) -> Result<Vec<FileEntry>, SandboxError> {
        let inner = self.lock();
        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();
        for (file, content) in &inner.files {
            let Some(rest) = under(path, file) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((dir, _)) => FileEntry {
                    name: dir.to_string(),
                    is_dir: true,
                    size: 0,
                    modified: None,
                },
                None => FileEntry {
                    name: rest.clone(),
                    is_dir: false,
                    size: content.len() as u64,
                    modified: None,
                },
            };
            entries.entry(entry.name.clone()).or_insert(entry);
        }
        Ok(entries.into_values().collect())
    }

    async fn find_files(
        &self,
        path: &str,
        pattern: &str,
    ) -> Result<Vec<SearchMatch>, SandboxError> {
        let inner = self.lock();
        let mut matches = Vec::new();
        for (file, content) in &inner.files {
            if under(path, file).is_none() {
                continue;
            }
            let text = String::from_utf8_lossy(content);
            for (idx, line) in text.lines().enumerate() {
                if line.contains(pattern) {
                    matches.push(SearchMatch {
                        file: file.clone(),
                        line: idx as u64 + 1,
                        content: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn replace_in_files(
        &self,
        files: &[String],
        pattern: &str,
        new_value: &str,
    ) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        for file in files {
            if let Some(content) = inner.files.get_mut(file) {
                let replaced = String::from_utf8_lossy(content).replace(pattern, new_value);
                *content = replaced.into_bytes();
            }
        }
        Ok(())
    }

    async fn upload_file(&self, path: &str, content: Vec<u8>) -> Result<(), SandboxError> {
        self.lock().files.insert(path.to_string(), content);
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), SandboxError> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SandboxError::Operation(format!("File not found: {}", path)))
    }

    async fn git_status(&self, _path: &str) -> Result<GitStatus, SandboxError> {
        let inner = self.git_guard()?;
        Ok(GitStatus {
            current_branch: inner.current_branch.clone(),
            ahead: 0,
            behind: 0,
            modified_files: inner.staged.clone(),
        })
    }

    async fn git_branches(&self, _path: &str) -> Result<Vec<String>, SandboxError> {
        Ok(self.git_guard()?.branches.clone())
    }

    async fn git_create_branch(&self, _path: &str, name: &str) -> Result<(), SandboxError> {
        let mut inner = self.git_guard()?;
        if !inner.branches.iter().any(|b| b == name) {
            inner.branches.push(name.to_string());
        }
        Ok(())
    }

    async fn git_checkout_branch(&self, _path: &str, name: &str) -> Result<(), SandboxError> {
        let mut inner = self.git_guard()?;
        if !inner.branches.iter().any(|b| b == name) {
            return Err(SandboxError::Operation(format!("unknown branch {}", name)));
        }
        inner.current_branch = name.to_string();
        Ok(())
    }

    async fn git_add(&self, _path: &str, files: &[String]) -> Result<(), SandboxError> {
        self.git_guard()?.staged.extend(files.iter().cloned());
        Ok(())
    }

    async fn git_commit(
        &self,
        _path: &str,
        message: &str,
        author: &str,
        email: &str,
    ) -> Result<(), SandboxError> {
        self.git_guard()?.commits.push((
            message.to_string(),
            author.to_string(),
            email.to_string(),
        ));
        Ok(())
    }

    async fn git_push(&self, _path: &str) -> Result<(), SandboxError> {
        self.git_guard()?.pushes += 1;
        Ok(())
    }

    async fn git_pull(&self, _path: &str) -> Result<(), SandboxError> {
        self.git_guard()?;
        Ok(())
    }

    async fn git_clone(
        &self,
        url: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<(), SandboxError> {
        self.git_guard()?.clones.push((
            url.to_string(),
            path.to_string(),
            branch.map(str::to_string),
        ));
        Ok(())
    }

    async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError> {
        let mut inner = self.lock();
        inner.commands.push(ExecCall {
            command: command.to_string(),
            cwd: cwd.map(str::to_string),
            timeout,
        });
        Ok(Self::exec_result(&inner))
    }

    async fn code_run(
        &self,
        code: &str,
        language: Language,
        _timeout: Option<Duration>,
    ) -> Result<ExecResponse, SandboxError> {
        let mut inner = self.lock();
        inner.code_runs.push((code.to_string(), language));
        Ok(Self::exec_result(&inner))
    }
}

// ============================================================================
// Fake provider
// ============================================================================

#[derive(Default)]
struct ProviderInner {
    created: Vec<(String, EnvironmentSpec)>,
    sandboxes: HashMap<String, Arc<FakeSandbox>>,
    seed_files: Vec<(String, String)>,
    fail_creates: bool,
    fail_deletes: bool,
    held: HashMap<String, Arc<tokio::sync::Notify>>,
}

/// Hands out [`FakeSandbox`]es and remembers them by name.
#[derive(Default)]
pub struct FakeProvider {
    inner: Mutex<ProviderInner>,
}

impl FakeProvider {
    pub fn created_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn created_specs(&self) -> Vec<EnvironmentSpec> {
        self.inner
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|(_, spec)| spec.clone())
            .collect()
    }

    pub fn sandbox(&self, name: &str) -> Option<Arc<FakeSandbox>> {
        self.inner.lock().unwrap().sandboxes.get(name).cloned()
    }

    /// Put a file into every sandbox created from now on.
    pub fn seed_file(&self, path: &str, content: &str) {
        self.inner
            .lock()
            .unwrap()
            .seed_files
            .push((path.to_string(), content.to_string()));
    }

    pub fn fail_creates(&self) {
        self.inner.lock().unwrap().fail_creates = true;
    }

    pub fn fail_deletes(&self) {
        self.inner.lock().unwrap().fail_deletes = true;
    }

    /// Park the creation of `name` until the returned gate is notified.
    pub fn hold_create(&self, name: &str) -> Arc<tokio::sync::Notify> {
        let gate = Arc::new(tokio::sync::Notify::new());
        self.inner
            .lock()
            .unwrap()
            .held
            .insert(name.to_string(), gate.clone());
        gate
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(
        &self,
        name: &str,
        spec: &EnvironmentSpec,
    ) -> Result<SandboxHandle, SandboxError> {
        let gate = self.inner.lock().unwrap().held.remove(name);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.fail_creates {
            return Err(SandboxError::Operation(format!(
                "create failed for {}",
                name
            )));
        }

        let sandbox = Arc::new(FakeSandbox::new(name));
        if inner.fail_deletes {
            sandbox.fail_deletes();
        }
        for (path, content) in &inner.seed_files {
            sandbox.put_file(path, content);
        }
        inner.created.push((name.to_string(), spec.clone()));
        inner.sandboxes.insert(name.to_string(), sandbox.clone());
        Ok(sandbox as SandboxHandle)
    }
}

// ============================================================================
// Recording poster
// ============================================================================

/// Records posted comments and answers with increasing comment ids, or
/// rejects everything with HTTP 422 when built with [`RecordingPoster::failing`].
#[derive(Default)]
pub struct RecordingPoster {
    fail: bool,
    next_id: AtomicI64,
    inline: Mutex<Vec<InlineComment>>,
    files: Mutex<Vec<(String, String)>>,
}

impl RecordingPoster {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn inline_comments(&self) -> Vec<InlineComment> {
        self.inline.lock().unwrap().clone()
    }

    pub fn file_comments(&self) -> Vec<(String, String)> {
        self.files.lock().unwrap().clone()
    }

    fn answer(&self) -> Result<PostedComment, PostingError> {
        if self.fail {
            return Err(PostingError::Api {
                status: 422,
                message: "Validation Failed".to_string(),
            });
        }
        Ok(PostedComment {
            id: Some(5000 + self.next_id.fetch_add(1, Ordering::SeqCst)),
        })
    }
}

#[async_trait]
impl ReviewPoster for RecordingPoster {
    async fn post_inline_comment(
        &self,
        _target: &PullRequestRef,
        comment: &InlineComment,
    ) -> Result<PostedComment, PostingError> {
        let posted = self.answer()?;
        self.inline.lock().unwrap().push(comment.clone());
        Ok(posted)
    }

    async fn post_file_comment(
        &self,
        _target: &PullRequestRef,
        path: &str,
        body: &str,
    ) -> Result<PostedComment, PostingError> {
        let posted = self.answer()?;
        self.files
            .lock()
            .unwrap()
            .push((path.to_string(), body.to_string()));
        Ok(posted)
    }
}
