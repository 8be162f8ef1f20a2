#![allow(dead_code)]

use async_trait::async_trait;
use speakperf_core::compose::source::SourceResolver;
use speakperf_core::discovery::{ProbeError, SpecProbe};
use speakperf_core::executor::{LoadInvocation, LoadTool};
use speakperf_core::runtime::process::{CommandOutput, ProcessError};
use speakperf_core::runtime::ContainerRuntime;
use speakperf_core::storage::Store;
use speakperf_core::{Dependencies, Orchestrator, OrchestratorConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const WEB_COMPOSE: &str = "services:\n  web:\n    image: nginx:alpine\n    ports:\n      - \"8080:8080\"\n";

fn ok_output(text: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        exit_code: Some(0),
        combined: text.to_string(),
        duration_ms: 1,
    }
}

fn failed_output(code: i32, text: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        exit_code: Some(code),
        combined: text.to_string(),
        duration_ms: 1,
    }
}

/// Records every up/down and the compose file seen by each call.
#[derive(Default)]
pub struct FakeRuntime {
    pub fail_up: bool,
    pub fail_down: bool,
    pub ups: Mutex<Vec<String>>,
    pub downs: Mutex<Vec<String>>,
    pub files: Mutex<Vec<PathBuf>>,
}

impl FakeRuntime {
    pub fn ups(&self) -> Vec<String> {
        self.ups.lock().unwrap().clone()
    }

    pub fn downs(&self) -> Vec<String> {
        self.downs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up(
        &self,
        compose_file: &Path,
        project: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        assert!(compose_file.exists(), "compose file must exist before up");
        self.ups.lock().unwrap().push(project.to_string());
        self.files.lock().unwrap().push(compose_file.to_path_buf());
        if self.fail_up {
            Ok(failed_output(1, "Error response from daemon: pull access denied"))
        } else {
            Ok(ok_output("Container web Started"))
        }
    }

    async fn down(
        &self,
        _compose_file: &Path,
        project: &str,
        _cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        self.downs.lock().unwrap().push(project.to_string());
        if self.fail_down {
            Ok(failed_output(1, "Cannot connect to the Docker daemon"))
        } else {
            Ok(ok_output("Container web Removed"))
        }
    }
}

/// Returns 200 for URLs whose path is one of `ok_paths`, 404 otherwise.
pub struct StubProbe {
    pub ok_paths: Vec<String>,
    pub seen: Mutex<Vec<String>>,
}

impl StubProbe {
    pub fn ok_for(paths: &[&str]) -> Self {
        Self {
            ok_paths: paths.iter().map(|s| s.to_string()).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpecProbe for StubProbe {
    async fn probe(&self, url: &str, _cancel: &CancellationToken) -> Result<u16, ProbeError> {
        self.seen.lock().unwrap().push(url.to_string());
        let path = url
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("");
        if self.ok_paths.iter().any(|p| p == path) {
            Ok(200)
        } else {
            Ok(404)
        }
    }
}

pub enum LoadBehaviour {
    /// Exit 0, writing these NDJSON lines when a JSON output is requested.
    Succeed(String),
    Fail(i32),
    /// Block until cancelled.
    Hang,
}

pub struct FakeLoadTool {
    pub behaviour: LoadBehaviour,
    pub calls: Mutex<Vec<(u32, String, bool)>>,
}

impl FakeLoadTool {
    pub fn new(behaviour: LoadBehaviour) -> Self {
        Self {
            behaviour,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(LoadBehaviour::Succeed(sample_points()))
    }
}

#[async_trait]
impl LoadTool for FakeLoadTool {
    async fn run(
        &self,
        inv: &LoadInvocation<'_>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        assert!(inv.script.exists(), "script must be written before the tool runs");
        self.calls.lock().unwrap().push((
            inv.virtual_users,
            inv.duration.to_string(),
            inv.json_out.is_some(),
        ));
        match &self.behaviour {
            LoadBehaviour::Succeed(lines) => {
                if let Some(out) = inv.json_out {
                    std::fs::write(out, lines).unwrap();
                }
                Ok(ok_output("checks.........: 100.00% ✓ 42"))
            }
            LoadBehaviour::Fail(code) => Ok(failed_output(*code, "thresholds on metrics 'http_req_duration' have been crossed")),
            LoadBehaviour::Hang => {
                cancel.cancelled().await;
                Err(ProcessError::Cancelled)
            }
        }
    }
}

pub fn sample_points() -> String {
    let mut out = String::new();
    for (t, v, failed) in [("2024-05-01T10:00:00Z", 120.0, 0.0), ("2024-05-01T10:00:02Z", 80.0, 0.0)] {
        for (metric, value) in [("http_req_duration", v), ("http_req_failed", failed), ("http_reqs", 1.0)] {
            out.push_str(
                &serde_json::json!({
                    "type": "Point",
                    "metric": metric,
                    "data": {"time": t, "value": value, "tags": {"name": "/", "url": "http://localhost:8080/"}}
                })
                .to_string(),
            );
            out.push('\n');
        }
    }
    out
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Store,
    pub runtime: Arc<FakeRuntime>,
    pub probe: Arc<StubProbe>,
    pub load_tool: Arc<FakeLoadTool>,
    pub work_root: tempfile::TempDir,
    pub scratch: tempfile::TempDir,
}

impl Harness {
    pub fn new(runtime: FakeRuntime, probe: StubProbe, load_tool: FakeLoadTool) -> Self {
        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let runtime = Arc::new(runtime);
        let probe = Arc::new(probe);
        let load_tool = Arc::new(load_tool);
        let work_root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(Dependencies {
            store: store.clone(),
            resolver: SourceResolver::default(),
            runtime: runtime.clone(),
            probe: probe.clone(),
            load_tool: load_tool.clone(),
            config: OrchestratorConfig {
                work_root: work_root.path().to_path_buf(),
                settle_delay: Duration::ZERO,
                probe_host: "localhost".to_string(),
            },
        });
        Self {
            orchestrator,
            store,
            runtime,
            probe,
            load_tool,
            work_root,
            scratch,
        }
    }

    pub fn default_fakes() -> Self {
        Self::new(
            FakeRuntime::default(),
            StubProbe::ok_for(&["/openapi.json"]),
            FakeLoadTool::succeeding(),
        )
    }

    /// Writes compose content to a scratch file and returns its path.
    pub fn compose_file(&self, name: &str, content: &str) -> String {
        let path = self.scratch.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Runtime directories still present under the work root.
    pub fn leftover_workdirs(&self) -> usize {
        std::fs::read_dir(self.work_root.path()).unwrap().count()
    }
}
