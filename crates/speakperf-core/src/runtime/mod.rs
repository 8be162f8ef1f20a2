//! Runtime materializer.
//!
//! Turns compose content into a live, isolated container environment and
//! guarantees it is torn down again. Every bring-up gets its own working
//! directory and its own compose project name, unique per operation rather
//! than per session, so discovery and execution against one session (or two
//! concurrent quick tests) never share containers or files.

pub mod process;

use crate::errors::{PerfError, PerfResult};
use async_trait::async_trait;
use process::{run_command, CommandOutput, ProcessError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

static OP_SEQ: AtomicU64 = AtomicU64::new(1);

/// Container runtime able to start and stop a compose project.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn up(
        &self,
        compose_file: &Path,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError>;

    /// Stops the project and removes its volumes.
    async fn down(
        &self,
        compose_file: &Path,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError>;
}

/// `docker compose` (v2 plugin syntax).
#[derive(Clone, Debug)]
pub struct DockerCompose {
    pub program: String,
}

impl Default for DockerCompose {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCompose {
    fn args(compose_file: &Path, project: &str, tail: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            compose_file.to_string_lossy().into_owned(),
            "-p".to_string(),
            project.to_string(),
        ];
        args.extend(tail.iter().map(|s| s.to_string()));
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn up(
        &self,
        compose_file: &Path,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        let args = Self::args(compose_file, project, &["up", "-d"]);
        run_command(&self.program, &args, compose_file.parent(), cancel).await
    }

    async fn down(
        &self,
        compose_file: &Path,
        project: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        let args = Self::args(compose_file, project, &["down", "-v"]);
        run_command(&self.program, &args, compose_file.parent(), cancel).await
    }
}

/// Why a runtime is being brought up. Each purpose has its own project-name
/// prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimePurpose {
    Discovery,
    Execution,
    Quick,
}

impl RuntimePurpose {
    pub fn project_prefix(&self) -> &'static str {
        match self {
            RuntimePurpose::Discovery => "discover",
            RuntimePurpose::Execution => "perftest",
            RuntimePurpose::Quick => "quick",
        }
    }
}

/// A materialized (written, possibly running) environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeHandle {
    pub session_id: i64,
    pub project: String,
    pub workdir: PathBuf,
    pub compose_file: PathBuf,
}

/// Outcome of releasing a runtime. Never turned into the operation's error,
/// but always handed back so the caller can surface it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub project: String,
    pub down_ok: bool,
    pub down_output: String,
    pub workdir_removed: bool,
    pub error: Option<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.down_ok && self.workdir_removed && self.error.is_none()
    }

    pub fn describe(&self) -> String {
        let mut msg = format!("Cleanup of project '{}'", self.project);
        if self.is_clean() {
            msg.push_str(": containers stopped and removed.");
            return msg;
        }
        msg.push_str(" was incomplete:");
        if !self.down_ok {
            msg.push_str(" compose down failed");
            if let Some(e) = &self.error {
                msg.push_str(&format!(" ({e})"));
            }
            msg.push('.');
        }
        if !self.workdir_removed {
            msg.push_str(" working directory could not be removed.");
        }
        if !self.down_output.trim().is_empty() && !self.down_ok {
            msg.push_str(&format!("\n{}", self.down_output.trim()));
        }
        msg
    }
}

/// Result of a bracketed runtime operation: the body's result and, when a
/// bring-up was attempted, what the release did.
#[derive(Debug)]
pub struct Bracketed<T> {
    pub result: PerfResult<T>,
    pub teardown: Option<TeardownReport>,
}

pub struct Materializer {
    runtime: Arc<dyn ContainerRuntime>,
    work_root: PathBuf,
    settle_delay: Duration,
}

impl Materializer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, work_root: PathBuf, settle_delay: Duration) -> Self {
        Self {
            runtime,
            work_root,
            settle_delay,
        }
    }

    /// Writes the compose content into a fresh directory and picks a project
    /// name. Both are unique per call.
    pub async fn materialize(
        &self,
        content: &str,
        session_id: i64,
        purpose: RuntimePurpose,
    ) -> PerfResult<RuntimeHandle> {
        let token = operation_token(session_id);
        let workdir = self.work_root.join(format!("k6-test-{token}"));
        let project = format!("{}-{token}", purpose.project_prefix());

        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| materialize_err(&project, e))?;
        // create_dir (not _all) fails if the path already exists
        tokio::fs::create_dir(&workdir)
            .await
            .map_err(|e| materialize_err(&project, e))?;

        let compose_file = workdir.join(COMPOSE_FILE_NAME);
        if let Err(e) = tokio::fs::write(&compose_file, content).await {
            let _ = tokio::fs::remove_dir_all(&workdir).await;
            return Err(materialize_err(&project, e));
        }

        Ok(RuntimeHandle {
            session_id,
            project,
            workdir,
            compose_file,
        })
    }

    pub async fn bring_up(&self, handle: &RuntimeHandle, cancel: &CancellationToken) -> PerfResult<()> {
        let started = Instant::now();
        let res = self
            .runtime
            .up(&handle.compose_file, &handle.project, cancel)
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match res {
            Ok(out) if out.success => {
                tracing::info!(
                    event = "container_up",
                    project = %handle.project,
                    session_id = handle.session_id,
                    duration_ms,
                    outcome = "ok"
                );
                Ok(())
            }
            Ok(out) => {
                tracing::error!(
                    event = "container_up",
                    project = %handle.project,
                    session_id = handle.session_id,
                    duration_ms,
                    outcome = "failed",
                    output = %out.combined
                );
                Err(PerfError::ContainerStart {
                    project: handle.project.clone(),
                    message: out.status_text(),
                    output: out.combined,
                })
            }
            Err(ProcessError::Cancelled) => Err(PerfError::Cancelled),
            Err(e) => {
                tracing::error!(
                    event = "container_up",
                    project = %handle.project,
                    session_id = handle.session_id,
                    duration_ms,
                    outcome = "spawn_failed",
                    error = %e
                );
                Err(PerfError::ContainerStart {
                    project: handle.project.clone(),
                    message: e.to_string(),
                    output: String::new(),
                })
            }
        }
    }

    /// Stops the project, then removes the working directory. Failures are
    /// logged and reported, never returned as errors.
    pub async fn tear_down(&self, handle: &RuntimeHandle) -> TeardownReport {
        release(self.runtime.as_ref(), handle).await
    }

    /// Fixed settle interval after bring-up. No health polling.
    async fn settle(&self, cancel: &CancellationToken) -> PerfResult<()> {
        if self.settle_delay.is_zero() {
            return Ok(());
        }
        tracing::debug!(event = "settle_wait", wait_ms = self.settle_delay.as_millis() as u64);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PerfError::Cancelled),
            _ = tokio::time::sleep(self.settle_delay) => Ok(()),
        }
    }

    /// Acquire a runtime, run `body` against it, release it.
    ///
    /// Release (compose down, then directory removal) runs on every exit
    /// path once bring-up was attempted: success, error, cancellation of
    /// `cancel`, a panic in `body`, or this future being dropped.
    pub async fn with_runtime<T, F, Fut>(
        &self,
        content: &str,
        session_id: i64,
        purpose: RuntimePurpose,
        cancel: &CancellationToken,
        body: F,
    ) -> Bracketed<T>
    where
        F: FnOnce(RuntimeHandle) -> Fut,
        Fut: Future<Output = PerfResult<T>>,
    {
        let handle = match self.materialize(content, session_id, purpose).await {
            Ok(h) => h,
            Err(e) => {
                return Bracketed {
                    result: Err(e),
                    teardown: None,
                }
            }
        };

        let mut guard = ReleaseGuard {
            runtime: self.runtime.clone(),
            handle: Some(handle.clone()),
        };

        let result = async {
            self.bring_up(&handle, cancel).await?;
            self.settle(cancel).await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PerfError::Cancelled),
                r = body(handle.clone()) => r,
            }
        }
        .await;

        guard.disarm();
        let teardown = self.tear_down(&handle).await;

        Bracketed {
            result,
            teardown: Some(teardown),
        }
    }
}

async fn release(runtime: &dyn ContainerRuntime, handle: &RuntimeHandle) -> TeardownReport {
    let started = Instant::now();
    // cleanup deliberately ignores the caller's token
    let cleanup = CancellationToken::new();
    let (down_ok, down_output, error) = match runtime
        .down(&handle.compose_file, &handle.project, &cleanup)
        .await
    {
        Ok(out) if out.success => (true, out.combined, None),
        Ok(out) => (false, out.combined.clone(), Some(out.status_text())),
        Err(e) => (false, String::new(), Some(e.to_string())),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if down_ok {
        tracing::info!(
            event = "container_down",
            project = %handle.project,
            session_id = handle.session_id,
            duration_ms,
            outcome = "ok"
        );
    } else {
        tracing::warn!(
            event = "container_down",
            project = %handle.project,
            session_id = handle.session_id,
            duration_ms,
            outcome = "failed",
            error = error.as_deref().unwrap_or(""),
            output = %down_output
        );
    }

    let workdir_removed = match tokio::fs::remove_dir_all(&handle.workdir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!(
                event = "workdir_cleanup_failed",
                workdir = %handle.workdir.display(),
                error = %e
            );
            false
        }
    };

    TeardownReport {
        project: handle.project.clone(),
        down_ok,
        down_output,
        workdir_removed,
        error,
    }
}

/// Releases a runtime whose bracket was abandoned (panic or dropped future).
struct ReleaseGuard {
    runtime: Arc<dyn ContainerRuntime>,
    handle: Option<RuntimeHandle>,
}

impl ReleaseGuard {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::warn!(
            event = "runtime_release_on_drop",
            project = %handle.project,
            session_id = handle.session_id
        );
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                let runtime = self.runtime.clone();
                rt.spawn(async move {
                    release(runtime.as_ref(), &handle).await;
                });
            }
            Err(_) => {
                let _ = std::fs::remove_dir_all(&handle.workdir);
            }
        }
    }
}

/// Session id, wall-clock millis, pid and a process-wide counter.
fn operation_token(session_id: i64) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = OP_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{session_id}-{millis}-{}-{seq}", std::process::id())
}

fn materialize_err(project: &str, e: std::io::Error) -> PerfError {
    PerfError::ContainerStart {
        project: project.to_string(),
        message: format!("failed to write compose file: {e}"),
        output: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purposes_have_distinct_prefixes() {
        let prefixes = [
            RuntimePurpose::Discovery.project_prefix(),
            RuntimePurpose::Execution.project_prefix(),
            RuntimePurpose::Quick.project_prefix(),
        ];
        assert_eq!(prefixes, ["discover", "perftest", "quick"]);
    }

    #[test]
    fn docker_args_use_project_and_file() {
        let args = DockerCompose::args(Path::new("/tmp/x/docker-compose.yml"), "discover-1", &["down", "-v"]);
        assert_eq!(
            args,
            vec!["compose", "-f", "/tmp/x/docker-compose.yml", "-p", "discover-1", "down", "-v"]
        );
    }

    #[test]
    fn teardown_description_mentions_failure() {
        let report = TeardownReport {
            project: "perftest-1".into(),
            down_ok: false,
            down_output: "daemon unreachable".into(),
            workdir_removed: true,
            error: Some("exit status 1".into()),
        };
        let text = report.describe();
        assert!(!report.is_clean());
        assert!(text.contains("compose down failed (exit status 1)"));
        assert!(text.contains("daemon unreachable"));
    }
}
