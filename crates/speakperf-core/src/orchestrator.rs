//! Orchestration facade: the automated flow, the quick flow and the
//! step-by-step operations, all built from the same components.

use crate::analyzer::{self, AnalysisReport};
use crate::compose::source::SourceResolver;
use crate::compose::ComposeDocument;
use crate::discovery::{self, DiscoveryRequest, SpecProbe, SpecRef};
use crate::errors::{PerfError, PerfResult};
use crate::executor::{self, Executor, LoadTool};
use crate::generator::{self, Intensity, LoadProfile};
use crate::model::{HistoryPoint, SessionStatus, TestKind, TestSession};
use crate::runtime::{Bracketed, ContainerRuntime, Materializer, RuntimePurpose, TeardownReport};
use crate::storage::store::Store;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const AUTO_TEST_NAME: &str = "auto-load-test";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Parent of every materialized runtime directory.
    pub work_root: PathBuf,
    pub settle_delay: Duration,
    /// Host used to reach published ports, for probes and generated scripts.
    pub probe_host: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir(),
            settle_delay: Duration::from_secs(10),
            probe_host: "localhost".to_string(),
        }
    }
}

/// Everything the orchestrator talks to, built once at startup.
pub struct Dependencies {
    pub store: Store,
    pub resolver: SourceResolver,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub probe: Arc<dyn SpecProbe>,
    pub load_tool: Arc<dyn LoadTool>,
    pub config: OrchestratorConfig,
}

/// Text rendering of an operation result for the MCP boundary.
pub trait Report {
    fn render(&self) -> String;
}

/// Result of an operation plus any runtime releases that did not go
/// cleanly. Cleanup problems never replace the result.
#[derive(Debug)]
pub struct Outcome<T> {
    pub result: PerfResult<T>,
    pub cleanup_failures: Vec<TeardownReport>,
}

impl<T> Outcome<T> {
    fn new(result: PerfResult<T>, teardowns: Vec<TeardownReport>) -> Self {
        Self {
            result,
            cleanup_failures: teardowns.into_iter().filter(|t| !t.is_clean()).collect(),
        }
    }

    fn plain(result: PerfResult<T>) -> Self {
        Self::new(result, Vec::new())
    }

    pub fn cleanup_section(&self) -> Option<String> {
        if self.cleanup_failures.is_empty() {
            return None;
        }
        let mut out = String::from("## Cleanup\n");
        for t in &self.cleanup_failures {
            let _ = writeln!(out, "- {}", t.describe());
        }
        Some(out)
    }
}

#[derive(Debug, Clone)]
pub struct SetupSummary {
    pub session_id: i64,
    pub compose_file_id: i64,
    pub source: String,
    /// (name, image) in document order.
    pub services: Vec<(String, String)>,
}

impl Report for SetupSummary {
    fn render(&self) -> String {
        let mut out = String::from("Test environment configured:\n");
        let _ = writeln!(out, "- Session ID: {}", self.session_id);
        let _ = writeln!(out, "- Source: {}", self.source);
        let _ = writeln!(out, "- Services: {}", self.services.len());
        for (name, image) in &self.services {
            let _ = writeln!(out, "  • {name} ({image})");
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct DiscoverySummary {
    pub session_id: i64,
    pub specs: Vec<SpecRef>,
    pub used_runtime: bool,
}

impl Report for DiscoverySummary {
    fn render(&self) -> String {
        let mut out = format!("Discovered {} API specifications:\n", self.specs.len());
        for (i, spec) in self.specs.iter().enumerate() {
            match spec.id {
                Some(id) => {
                    let _ = writeln!(out, "{}. {} (spec ID: {id})", i + 1, spec.spec_url);
                }
                None => {
                    let _ = writeln!(out, "{}. {} (not recorded)", i + 1, spec.spec_url);
                }
            }
        }
        if self.used_runtime {
            out.push_str("\nContainers have been stopped.\n");
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedTestSummary {
    pub test_id: i64,
    pub name: String,
    pub kind: TestKind,
    pub preview: String,
}

impl Report for GeneratedTestSummary {
    fn render(&self) -> String {
        format!(
            "Generated {} test '{}' with ID: {}\n\nScript preview:\n```javascript\n{}...\n```\n",
            self.kind, self.name, self.test_id, self.preview
        )
    }
}

#[derive(Debug, Clone)]
pub struct UiTestSummary {
    pub test_id: i64,
    pub name: String,
    pub actions: usize,
}

impl Report for UiTestSummary {
    fn render(&self) -> String {
        format!(
            "Created UI test '{}' with ID: {} ({} browser actions)\n",
            self.name, self.test_id, self.actions
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub endpoints_recorded: usize,
    pub output: String,
}

impl Report for RunSummary {
    fn render(&self) -> String {
        format!(
            "Test completed. Run ID: {}\n\nContainers have been stopped and removed.\nMetrics recorded for {} endpoints.\n\n{}",
            self.run_id, self.endpoints_recorded, self.output
        )
    }
}

impl Report for AnalysisReport {
    fn render(&self) -> String {
        AnalysisReport::render(self)
    }
}

#[derive(Debug, Clone)]
pub struct AutomatedReport {
    pub session_id: i64,
    pub intensity: Intensity,
    pub services: usize,
    pub specs: Vec<SpecRef>,
    pub endpoints: Vec<String>,
    pub custom_endpoints: bool,
    pub test_id: i64,
    pub run_id: i64,
    pub virtual_users: u32,
    pub duration: String,
    pub output: String,
}

impl Report for AutomatedReport {
    fn render(&self) -> String {
        let mut out = String::from("# Automated Application Testing\n\n");
        out.push_str("## Step 1: Setting up environment\n");
        let _ = writeln!(
            out,
            "- Created session {} with {} services",
            self.session_id, self.services
        );
        out.push_str("\n## Step 2: Discovering APIs\n");
        if self.specs.is_empty() {
            out.push_str("- No API specs discovered\n");
        }
        for spec in &self.specs {
            let _ = writeln!(out, "- Found API spec: {}", spec.spec_url);
        }
        let _ = writeln!(out, "\n## Step 3: Running {} tests", self.intensity.as_str());
        if self.custom_endpoints {
            let _ = writeln!(out, "- Testing specific endpoints: {}", self.endpoints.join(", "));
        }
        let _ = writeln!(out, "- Test ID: {}, Run ID: {}", self.test_id, self.run_id);
        let _ = writeln!(
            out,
            "- Test completed with {} VUs for {}",
            self.virtual_users, self.duration
        );
        out.push_str("\n## Results Summary\n");
        let _ = writeln!(out, "```\n{}\n```", self.output.trim_end());
        out
    }
}

#[derive(Debug, Clone)]
pub struct QuickReport {
    pub session_id: i64,
    pub source: String,
    pub virtual_users: u32,
    pub duration: String,
    pub output: String,
}

impl Report for QuickReport {
    fn render(&self) -> String {
        let mut out = String::from("# Quick Performance Test\n\n");
        let _ = writeln!(out, "- Target: {}", self.source);
        let _ = writeln!(out, "- Session ID: {}", self.session_id);
        let _ = writeln!(out, "- VUs: {}", self.virtual_users);
        let _ = writeln!(out, "- Duration: {}\n", self.duration);
        let _ = writeln!(out, "## Results\n```\n{}\n```", self.output.trim_end());
        out
    }
}

pub struct Orchestrator {
    store: Store,
    resolver: SourceResolver,
    probe: Arc<dyn SpecProbe>,
    materializer: Arc<Materializer>,
    executor: Executor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(deps: Dependencies) -> Self {
        let materializer = Arc::new(Materializer::new(
            deps.runtime,
            deps.config.work_root.clone(),
            deps.config.settle_delay,
        ));
        let executor = Executor::new(deps.store.clone(), materializer.clone(), deps.load_tool);
        Self {
            store: deps.store,
            resolver: deps.resolver,
            probe: deps.probe,
            materializer,
            executor,
            config: deps.config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Resolve, validate and store a compose source, then open a session.
    pub async fn setup_environment(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Outcome<SetupSummary> {
        let result = async {
            let (doc, content) = self.load_compose(source, cancel).await?;
            let file = self
                .store
                .store_compose_file(source, &content)
                .map_err(PerfError::store)?;
            let name = format!("session-{}", chrono::Utc::now().timestamp());
            let session_id = self
                .store
                .create_session(file.id, &name, SessionStatus::Initialized)
                .map_err(PerfError::store)?;
            self.record_services(session_id, &doc);

            tracing::info!(
                event = "session_created",
                session_id,
                compose_file_id = file.id,
                services = doc.services.len()
            );
            Ok::<_, PerfError>(SetupSummary {
                session_id,
                compose_file_id: file.id,
                source: source.to_string(),
                services: doc
                    .services
                    .iter()
                    .map(|s| (s.name.clone(), s.image.clone().unwrap_or_default()))
                    .collect(),
            })
        }
        .await;
        Outcome::plain(result)
    }

    /// Discovery for the most recent session. Auto-discovery runs inside its
    /// own runtime bracket; explicit paths alone need no runtime.
    pub async fn discover_specs(
        &self,
        spec_paths: Option<&str>,
        auto_discover: bool,
        cancel: &CancellationToken,
    ) -> Outcome<DiscoverySummary> {
        let session = match self.latest_session() {
            Ok(s) => s,
            Err(e) => return Outcome::plain(Err(e)),
        };
        let explicit: Vec<String> = spec_paths
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        self.advance(session.id, SessionStatus::Running);

        let req = DiscoveryRequest {
            session_id: session.id,
            explicit_paths: &explicit,
            auto_discover,
            probe_host: &self.config.probe_host,
        };

        if !auto_discover {
            let result = discovery::discover(&self.store, self.probe.as_ref(), &req, cancel)
                .await
                .map(|specs| DiscoverySummary {
                    session_id: session.id,
                    specs,
                    used_runtime: false,
                });
            return Outcome::plain(result);
        }

        let content = match self.compose_content(session.id) {
            Ok(c) => c,
            Err(e) => return Outcome::plain(Err(e)),
        };
        let bracket = self
            .materializer
            .with_runtime(
                &content,
                session.id,
                RuntimePurpose::Discovery,
                cancel,
                |_handle| discovery::discover(&self.store, self.probe.as_ref(), &req, cancel),
            )
            .await;
        let Bracketed { result, teardown } = bracket;
        if let Err(e) = &result {
            self.finish_failed(session.id, e);
        }
        Outcome::new(
            result.map(|specs| DiscoverySummary {
                session_id: session.id,
                specs,
                used_runtime: true,
            }),
            teardown.into_iter().collect(),
        )
    }

    pub fn generate_api_tests(
        &self,
        spec_id: i64,
        endpoints: Option<&str>,
        test_type: &str,
    ) -> Outcome<GeneratedTestSummary> {
        let result = (|| -> PerfResult<GeneratedTestSummary> {
            let spec = self
                .store
                .spec(spec_id)
                .map_err(PerfError::store)?
                .ok_or_else(|| PerfError::not_found("api spec", spec_id))?;
            let profile = LoadProfile::parse(test_type);
            let base = generator::base_url_for_spec(&spec.spec_url, &self.config.probe_host);
            let endpoints = generator::parse_endpoints(endpoints);
            let script = generator::generate_api_test(spec.id, &base, &endpoints, profile);
            let name = generator::api_test_name(chrono::Utc::now());
            let test = self
                .store
                .record_test(spec.session_id, &name, profile.kind(), &script)
                .map_err(PerfError::store)?;
            tracing::info!(event = "test_generated", test_id = test.id, kind = %test.kind, spec_id);
            Ok(GeneratedTestSummary {
                test_id: test.id,
                name: test.name,
                kind: test.kind,
                preview: generator::preview(&script, generator::PREVIEW_CHARS).to_string(),
            })
        })();
        Outcome::plain(result)
    }

    pub fn create_ui_test(&self, url: &str, instructions: &str, name: &str) -> Outcome<UiTestSummary> {
        let result = (|| -> PerfResult<UiTestSummary> {
            let session = self.latest_session()?;
            let script = generator::generate_ui_test(url, instructions);
            let test = self
                .store
                .record_test(session.id, name, TestKind::Browser, &script)
                .map_err(PerfError::store)?;
            tracing::info!(event = "test_generated", test_id = test.id, kind = %test.kind);
            Ok(UiTestSummary {
                test_id: test.id,
                name: test.name,
                actions: generator::ui_actions(instructions).len(),
            })
        })();
        Outcome::plain(result)
    }

    pub async fn run_performance_test(
        &self,
        test_id: i64,
        virtual_users: u32,
        duration: &str,
        cancel: &CancellationToken,
    ) -> Outcome<RunSummary> {
        let test = match self.store.test(test_id).map_err(PerfError::store).and_then(|t| {
            t.ok_or_else(|| PerfError::not_found("test", test_id))
        }) {
            Ok(t) => t,
            Err(e) => return Outcome::plain(Err(e)),
        };
        if let Err(e) = executor::validate_duration(duration)
            .and_then(|_| executor::validate_virtual_users(virtual_users))
        {
            return Outcome::plain(Err(e));
        }
        let content = match self.compose_content(test.session_id) {
            Ok(c) => c,
            Err(e) => return Outcome::plain(Err(e)),
        };

        self.advance(test.session_id, SessionStatus::Running);
        let Bracketed { result, teardown } = self
            .executor
            .run_loaded(&test, &content, virtual_users, duration, cancel)
            .await;
        match &result {
            Ok(_) => self.advance(test.session_id, SessionStatus::Completed),
            Err(e) => self.finish_failed(test.session_id, e),
        }
        Outcome::new(
            result.map(|run| RunSummary {
                run_id: run.run_id,
                endpoints_recorded: run.samples.len(),
                output: run.output,
            }),
            teardown.into_iter().collect(),
        )
    }

    pub fn analyze_results(&self, run_id: i64, compare_history: bool) -> Outcome<AnalysisReport> {
        Outcome::plain(analyzer::analyze(&self.store, run_id, compare_history))
    }

    pub fn query_history(&self, endpoint: Option<&str>, days: u32) -> PerfResult<Vec<HistoryPoint>> {
        let endpoint = endpoint.map(str::trim).filter(|e| !e.is_empty());
        self.store.history(endpoint, days).map_err(PerfError::store)
    }

    /// The automated flow. Discovery and execution each get their own
    /// runtime; the session ends completed, failed or cancelled.
    pub async fn test_application(
        &self,
        source: &str,
        intensity: Intensity,
        endpoints: Option<&str>,
        cancel: &CancellationToken,
    ) -> Outcome<AutomatedReport> {
        let mut teardowns = Vec::new();

        let prepared = async {
            let (doc, content) = self.load_compose(source, cancel).await?;
            let file = self
                .store
                .store_compose_file(source, &content)
                .map_err(PerfError::store)?;
            let name = format!("auto-test-{}", chrono::Utc::now().timestamp());
            let session_id = self
                .store
                .create_session(file.id, &name, SessionStatus::Running)
                .map_err(PerfError::store)?;
            Ok::<_, PerfError>((doc, content, session_id))
        }
        .await;
        let (doc, content, session_id) = match prepared {
            Ok(v) => v,
            Err(e) => return Outcome::plain(Err(e)),
        };
        tracing::info!(event = "automated_flow_start", session_id, intensity = intensity.as_str());

        let result = async {
            let services = self.record_services(session_id, &doc);

            let req = DiscoveryRequest {
                session_id,
                explicit_paths: &[],
                auto_discover: true,
                probe_host: &self.config.probe_host,
            };
            let Bracketed { result, teardown } = self
                .materializer
                .with_runtime(&content, session_id, RuntimePurpose::Discovery, cancel, |_h| {
                    discovery::discover(&self.store, self.probe.as_ref(), &req, cancel)
                })
                .await;
            teardowns.extend(teardown);
            let specs = result?;

            let custom_endpoints = endpoints.is_some_and(|e| e.split(',').any(|p| !p.trim().is_empty()));
            let endpoint_list = generator::parse_endpoints(endpoints);
            let port = doc
                .first_host_port()
                .unwrap_or_else(|| generator::FALLBACK_PORT.to_string());
            let base = format!("http://{}:{}", self.config.probe_host, port);
            let vus = intensity.virtual_users();
            let duration = intensity.duration();
            let script = generator::generate_load_script(vus, duration, &base, &endpoint_list);
            let test = self
                .store
                .record_test(session_id, AUTO_TEST_NAME, TestKind::Load, &script)
                .map_err(PerfError::store)?;

            let Bracketed { result, teardown } = self
                .executor
                .run_loaded(&test, &content, vus, duration, cancel)
                .await;
            teardowns.extend(teardown);
            let run = result?;

            Ok::<_, PerfError>(AutomatedReport {
                session_id,
                intensity,
                services,
                specs,
                endpoints: endpoint_list,
                custom_endpoints,
                test_id: test.id,
                run_id: run.run_id,
                virtual_users: vus,
                duration: duration.to_string(),
                output: run.output,
            })
        }
        .await;

        match &result {
            Ok(_) => self.advance(session_id, SessionStatus::Completed),
            Err(e) => self.finish_failed(session_id, e),
        }
        tracing::info!(
            event = "automated_flow_done",
            session_id,
            outcome = if result.is_ok() { "completed" } else { "failed" }
        );
        Outcome::new(result, teardowns)
    }

    /// Reduced flow: no discovery and nothing recorded beyond the compose
    /// file and the session.
    pub async fn quick_performance_test(
        &self,
        source: &str,
        virtual_users: u32,
        duration: &str,
        cancel: &CancellationToken,
    ) -> Outcome<QuickReport> {
        let prepared = async {
            executor::validate_duration(duration)?;
            executor::validate_virtual_users(virtual_users)?;
            let (doc, content) = self.load_compose(source, cancel).await?;
            let file = self
                .store
                .store_compose_file(source, &content)
                .map_err(PerfError::store)?;
            let name = format!("quick-{}", chrono::Utc::now().timestamp());
            let session_id = self
                .store
                .create_session(file.id, &name, SessionStatus::Running)
                .map_err(PerfError::store)?;
            Ok::<_, PerfError>((doc, content, session_id))
        }
        .await;
        let (doc, content, session_id) = match prepared {
            Ok(v) => v,
            Err(e) => return Outcome::plain(Err(e)),
        };

        let port = doc
            .first_host_port()
            .unwrap_or_else(|| generator::FALLBACK_PORT.to_string());
        let script = generator::health_check_script(&format!("http://{}:{}", self.config.probe_host, port));

        let Bracketed { result, teardown } = self
            .executor
            .run_unrecorded(&content, session_id, &script, virtual_users, duration, cancel)
            .await;
        match &result {
            Ok(_) => self.advance(session_id, SessionStatus::Completed),
            Err(e) => self.finish_failed(session_id, e),
        }
        Outcome::new(
            result.map(|output| QuickReport {
                session_id,
                source: source.to_string(),
                virtual_users,
                duration: duration.to_string(),
                output,
            }),
            teardown.into_iter().collect(),
        )
    }

    async fn load_compose(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> PerfResult<(ComposeDocument, String)> {
        let content = self.resolver.resolve(source, cancel).await?;
        let doc = ComposeDocument::parse(&content)?;
        Ok((doc, content))
    }

    fn latest_session(&self) -> PerfResult<TestSession> {
        self.store
            .latest_session()
            .map_err(PerfError::store)?
            .ok_or_else(|| {
                PerfError::not_found("session", "none configured; run setup_test_environment first")
            })
    }

    fn compose_content(&self, session_id: i64) -> PerfResult<String> {
        self.store
            .compose_content_for_session(session_id)
            .map_err(PerfError::store)?
            .ok_or_else(|| PerfError::not_found("compose file for session", session_id))
    }

    /// Records every service; a failing row is logged and skipped. Returns
    /// the number of services in the document.
    fn record_services(&self, session_id: i64, doc: &ComposeDocument) -> usize {
        for svc in &doc.services {
            if let Err(e) = self.store.record_service(session_id, svc) {
                tracing::warn!(
                    event = "service_record_failed",
                    session_id,
                    service = %svc.name,
                    error = %format!("{e:#}")
                );
            }
        }
        doc.services.len()
    }

    fn advance(&self, session_id: i64, next: SessionStatus) {
        if let Err(e) = self.store.update_session_status(session_id, next) {
            tracing::warn!(
                event = "session_status_update_failed",
                session_id,
                to = next.as_str(),
                error = %format!("{e:#}")
            );
        }
    }

    fn finish_failed(&self, session_id: i64, err: &PerfError) {
        let next = if err.is_cancelled() {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Failed
        };
        tracing::warn!(
            event = "session_aborted",
            session_id,
            status = next.as_str(),
            code = err.code(),
            error = %err
        );
        self.advance(session_id, next);
    }
}
