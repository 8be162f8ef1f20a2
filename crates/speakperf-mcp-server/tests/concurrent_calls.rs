use async_trait::async_trait;
use serde_json::Value;
use speakperf_core::compose::source::SourceResolver;
use speakperf_core::discovery::{ProbeError, SpecProbe};
use speakperf_core::executor::{LoadInvocation, LoadTool};
use speakperf_core::runtime::process::{CommandOutput, ProcessError};
use speakperf_core::runtime::ContainerRuntime;
use speakperf_core::storage::Store;
use speakperf_core::{Dependencies, Orchestrator, OrchestratorConfig};
use speakperf_mcp_server::config::ServerConfig;
use speakperf_mcp_server::server::Server;
use speakperf_mcp_server::tools::ToolContext;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio_util::sync::CancellationToken;

fn output(text: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        exit_code: Some(0),
        combined: text.to_string(),
        duration_ms: 1,
    }
}

#[derive(Default)]
struct CountingRuntime {
    ups: Mutex<Vec<String>>,
    downs: Mutex<Vec<String>>,
}

#[async_trait]
impl ContainerRuntime for CountingRuntime {
    async fn up(&self, _f: &Path, project: &str, _c: &CancellationToken) -> Result<CommandOutput, ProcessError> {
        self.ups.lock().unwrap().push(project.to_string());
        Ok(output("started"))
    }

    async fn down(&self, _f: &Path, project: &str, _c: &CancellationToken) -> Result<CommandOutput, ProcessError> {
        self.downs.lock().unwrap().push(project.to_string());
        Ok(output("removed"))
    }
}

struct NoSpecs;

#[async_trait]
impl SpecProbe for NoSpecs {
    async fn probe(&self, _url: &str, _c: &CancellationToken) -> Result<u16, ProbeError> {
        Ok(404)
    }
}

/// Blocks until cancelled.
#[derive(Default)]
struct HangingTool {
    started: Mutex<usize>,
}

#[async_trait]
impl LoadTool for HangingTool {
    async fn run(&self, _inv: &LoadInvocation<'_>, cancel: &CancellationToken) -> Result<CommandOutput, ProcessError> {
        *self.started.lock().unwrap() += 1;
        cancel.cancelled().await;
        Err(ProcessError::Cancelled)
    }
}

struct PanickingTool;

#[async_trait]
impl LoadTool for PanickingTool {
    async fn run(&self, _inv: &LoadInvocation<'_>, _c: &CancellationToken) -> Result<CommandOutput, ProcessError> {
        panic!("k6 wrapper bug");
    }
}

struct Rig {
    runtime: Arc<CountingRuntime>,
    tool: Arc<HangingTool>,
    store: Store,
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    server: tokio::task::JoinHandle<anyhow::Result<()>>,
    compose: String,
    _tmp: tempfile::TempDir,
}

impl Rig {
    fn start() -> Self {
        let tool = Arc::new(HangingTool::default());
        Self::with_load_tool(tool.clone(), tool)
    }

    fn with_load_tool(tool: Arc<HangingTool>, load_tool: Arc<dyn LoadTool>) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let compose = tmp.path().join("docker-compose.yml");
        std::fs::write(&compose, "services:\n  web:\n    image: nginx:alpine\n    ports:\n      - \"8080:80\"\n").unwrap();
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();

        let store = Store::memory().unwrap();
        store.init_schema().unwrap();
        let runtime = Arc::new(CountingRuntime::default());
        let orchestrator = Orchestrator::new(Dependencies {
            store: store.clone(),
            resolver: SourceResolver::default(),
            runtime: runtime.clone(),
            probe: Arc::new(NoSpecs),
            load_tool,
            config: OrchestratorConfig {
                work_root: work,
                settle_delay: Duration::ZERO,
                probe_host: "localhost".to_string(),
            },
        });
        let ctx = Arc::new(ToolContext::new(Arc::new(orchestrator), ServerConfig::default()));

        let (input, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(Server::serve(ctx, BufReader::new(server_in), server_out));

        Self {
            runtime,
            tool,
            store,
            input,
            output: BufReader::new(client_out).lines(),
            server,
            compose: compose.to_string_lossy().into_owned(),
            _tmp: tmp,
        }
    }

    async fn send(&mut self, msg: Value) {
        let mut line = msg.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.output.next_line())
            .await
            .expect("response within timeout")
            .unwrap()
            .expect("stream open");
        serde_json::from_str(&line).unwrap()
    }

    async fn wait_for_load_tool(&self) {
        for _ in 0..500 {
            if *self.tool.started.lock().unwrap() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("load tool never started");
    }

    fn quick_call(&self, id: u64) -> Value {
        self.call(
            id,
            "quick_performance_test",
            serde_json::json!({ "composeSource": self.compose, "vus": "2", "duration": "5s" }),
        )
    }

    fn call(&self, id: u64, tool: &str, args: Value) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": tool, "arguments": args },
            "id": id
        })
    }

    /// Sends one call and returns its text and error flag.
    async fn call_text(&mut self, id: u64, tool: &str, args: Value) -> (String, bool) {
        let msg = self.call(id, tool, args);
        self.send(msg).await;
        let resp = self.recv().await;
        assert_eq!(resp["id"], id);
        (
            resp["result"]["content"][0]["text"].as_str().unwrap().to_string(),
            resp["result"]["isError"].as_bool().unwrap(),
        )
    }
}

#[tokio::test]
async fn cancelled_notification_aborts_call_and_releases_runtime() {
    let mut rig = Rig::start();
    let call = rig.quick_call(7);
    rig.send(call).await;
    rig.wait_for_load_tool().await;

    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 7, "reason": "user abort" }
    }))
    .await;

    let resp = rig.recv().await;
    assert_eq!(resp["id"], 7);
    assert_eq!(resp["result"]["isError"], true);
    assert!(resp["result"]["content"][0]["text"].as_str().unwrap().contains("E_CANCELLED"));

    let ups = rig.runtime.ups.lock().unwrap().clone();
    let downs = rig.runtime.downs.lock().unwrap().clone();
    assert_eq!(ups.len(), 1);
    assert_eq!(downs, ups);

    let session = rig.store.latest_session().unwrap().unwrap();
    assert_eq!(session.status.as_str(), "cancelled");
}

#[tokio::test]
async fn long_call_does_not_block_other_requests_and_eof_cancels_it() {
    let mut rig = Rig::start();
    let call = rig.quick_call(1);
    rig.send(call).await;
    rig.wait_for_load_tool().await;

    rig.send(serde_json::json!({ "jsonrpc": "2.0", "method": "tools/list", "id": 2 }))
        .await;
    let resp = rig.recv().await;
    assert_eq!(resp["id"], 2);

    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "analyze_results", "arguments": { "runId": "404" } },
        "id": 3
    }))
    .await;
    let resp = rig.recv().await;
    assert_eq!(resp["id"], 3);
    assert!(resp["result"]["content"][0]["text"].as_str().unwrap().contains("E_NOT_FOUND"));

    // closing input cancels what is still running
    rig.input.shutdown().await.unwrap();
    let resp = rig.recv().await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["isError"], true);
    rig.server.await.unwrap().unwrap();
    assert_eq!(
        rig.runtime.downs.lock().unwrap().len(),
        rig.runtime.ups.lock().unwrap().len()
    );
}

#[tokio::test]
async fn invalid_arguments_have_no_side_effects() {
    let mut rig = Rig::start();
    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "test_application", "arguments": { "composeSource": rig.compose, "testType": "extreme" } },
        "id": 11
    }))
    .await;
    let resp = rig.recv().await;
    assert_eq!(resp["result"]["isError"], true);
    assert!(resp["result"]["content"][0]["text"].as_str().unwrap().contains("E_INVALID_ARGS"));
    assert_eq!(rig.store.count_rows("compose_files").unwrap(), 0);
    assert!(rig.runtime.ups.lock().unwrap().is_empty());
}

#[tokio::test]
async fn step_tools_accept_string_ids_and_flags() {
    let mut rig = Rig::start();
    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "setup_test_environment", "arguments": { "composePath": rig.compose } },
        "id": 1
    }))
    .await;
    assert_eq!(rig.recv().await["result"]["isError"], false);

    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "discover_api_specs", "arguments": { "specPaths": "/openapi.json", "autoDiscover": "false" } },
        "id": 2
    }))
    .await;
    let resp = rig.recv().await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap().to_string();
    assert!(text.contains("/openapi.json (spec ID: 1)"), "{text}");
    assert!(rig.runtime.ups.lock().unwrap().is_empty());

    rig.send(serde_json::json!({
        "jsonrpc": "2.0",
        "method": "tools/call",
        "params": { "name": "generate_api_tests", "arguments": { "specId": "1", "testType": "spike" } },
        "id": 3
    }))
    .await;
    let resp = rig.recv().await;
    let text = resp["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Generated spike test 'api-test-"), "{text}");
    assert!(text.contains("```javascript"));
}

#[tokio::test]
async fn panicking_tool_still_answers_and_releases_runtime() {
    let mut rig = Rig::with_load_tool(Arc::new(HangingTool::default()), Arc::new(PanickingTool));
    let call = rig.quick_call(5);
    rig.send(call).await;

    let resp = rig.recv().await;
    assert_eq!(resp["id"], 5);
    assert_eq!(resp["result"]["isError"], true);
    assert!(resp["result"]["content"][0]["text"].as_str().unwrap().contains("E_INTERNAL"));

    // the server keeps serving after the crash
    rig.send(serde_json::json!({ "jsonrpc": "2.0", "method": "ping", "id": 6 }))
        .await;
    assert_eq!(rig.recv().await["id"], 6);

    // release is spawned while unwinding
    for _ in 0..500 {
        if !rig.runtime.downs.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let ups = rig.runtime.ups.lock().unwrap().clone();
    assert_eq!(ups.len(), 1);
    assert_eq!(*rig.runtime.downs.lock().unwrap(), ups);

    rig.input.shutdown().await.unwrap();
    rig.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn out_of_range_parameters_are_reported_not_fatal() {
    let mut rig = Rig::start();
    let compose = rig.compose.clone();

    let (text, is_error) = rig
        .call_text(
            1,
            "quick_performance_test",
            serde_json::json!({ "composeSource": compose, "duration": "99999999999999999999h" }),
        )
        .await;
    assert!(is_error);
    assert!(text.contains("E_VALIDATION"), "{text}");

    let (text, is_error) = rig
        .call_text(2, "quick_performance_test", serde_json::json!({ "composeSource": compose, "vus": 0 }))
        .await;
    assert!(is_error);
    assert!(text.contains("E_INVALID_ARGS"), "{text}");

    let (text, is_error) = rig
        .call_text(3, "quick_performance_test", serde_json::json!({ "composeSource": compose, "vus": "0" }))
        .await;
    assert!(is_error);
    assert!(text.contains("E_VALIDATION"), "{text}");

    let (text, is_error) = rig
        .call_text(4, "run_performance_test", serde_json::json!({ "testId": 1, "vus": 0 }))
        .await;
    assert!(is_error);
    assert!(text.contains("E_INVALID_ARGS"), "{text}");

    let (text, is_error) = rig
        .call_text(5, "query_test_history", serde_json::json!({ "days": 4294967295u64 }))
        .await;
    assert!(!is_error, "{text}");
    assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), serde_json::json!([]));

    assert!(rig.runtime.ups.lock().unwrap().is_empty());
    assert_eq!(rig.store.count_rows("compose_files").unwrap(), 0);
}
