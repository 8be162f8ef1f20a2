//! Load-test execution against a freshly materialized runtime.

use crate::errors::{PerfError, PerfResult};
use crate::metrics;
use crate::model::{GeneratedTest, MetricSample};
use crate::runtime::process::{run_command, CommandOutput, ProcessError};
use crate::runtime::{Bracketed, Materializer, RuntimeHandle, RuntimePurpose};
use crate::storage::store::Store;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const SCRIPT_FILE_NAME: &str = "test.js";
pub const RESULTS_FILE_NAME: &str = "results.json";

pub struct LoadInvocation<'a> {
    pub script: &'a Path,
    pub virtual_users: u32,
    pub duration: &'a str,
    /// Where to write the NDJSON metrics stream, if wanted.
    pub json_out: Option<&'a Path>,
    pub workdir: &'a Path,
}

/// External load generator.
#[async_trait]
pub trait LoadTool: Send + Sync {
    async fn run(
        &self,
        invocation: &LoadInvocation<'_>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError>;
}

#[derive(Clone, Debug)]
pub struct K6 {
    pub program: String,
}

impl Default for K6 {
    fn default() -> Self {
        Self {
            program: "k6".to_string(),
        }
    }
}

impl K6 {
    fn args(inv: &LoadInvocation<'_>) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--vus".to_string(),
            inv.virtual_users.to_string(),
            "--duration".to_string(),
            inv.duration.to_string(),
        ];
        if let Some(out) = inv.json_out {
            args.push("--out".to_string());
            args.push(format!("json={}", out.display()));
        }
        args.push(inv.script.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl LoadTool for K6 {
    async fn run(
        &self,
        invocation: &LoadInvocation<'_>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ProcessError> {
        run_command(
            &self.program,
            &Self::args(invocation),
            Some(invocation.workdir),
            cancel,
        )
        .await
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: i64,
    pub output: String,
    pub samples: Vec<MetricSample>,
}

pub struct Executor {
    store: Store,
    materializer: Arc<Materializer>,
    load_tool: Arc<dyn LoadTool>,
}

impl Executor {
    pub fn new(store: Store, materializer: Arc<Materializer>, load_tool: Arc<dyn LoadTool>) -> Self {
        Self {
            store,
            materializer,
            load_tool,
        }
    }

    /// Runs a stored test inside its own runtime bracket and records the
    /// run. The run row is inserted before the tool starts and completed only
    /// when the tool exits successfully.
    pub async fn run_loaded(
        &self,
        test: &GeneratedTest,
        compose_content: &str,
        virtual_users: u32,
        duration: &str,
        cancel: &CancellationToken,
    ) -> Bracketed<RunOutcome> {
        let store = &self.store;
        let tool = self.load_tool.as_ref();
        self.materializer
            .with_runtime(
                compose_content,
                test.session_id,
                RuntimePurpose::Execution,
                cancel,
                |handle| async move {
                    let run_id = store
                        .create_run(test.id, virtual_users, duration)
                        .map_err(PerfError::store)?;
                    let results = handle.workdir.join(RESULTS_FILE_NAME);
                    let out = execute_script(
                        tool,
                        &handle,
                        &test.script,
                        virtual_users,
                        duration,
                        Some(&results),
                        Some(run_id),
                        cancel,
                    )
                    .await?;

                    let samples = tokio::task::spawn_blocking(move || {
                        metrics::aggregate_file(&results)
                    })
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|read| read.map_err(|e| e.to_string()))
                    .map_err(|e| PerfError::Execution {
                        message: format!("failed to read metrics output: {e}"),
                        output: String::new(),
                    })?;
                    store
                        .complete_run(run_id, &out.combined)
                        .map_err(PerfError::store)?;
                    store
                        .record_metrics(run_id, &samples)
                        .map_err(PerfError::store)?;

                    Ok(RunOutcome {
                        run_id,
                        output: out.combined,
                        samples,
                    })
                },
            )
            .await
    }

    /// Runs an ad-hoc script without recording a test, run or metrics.
    pub async fn run_unrecorded(
        &self,
        compose_content: &str,
        session_id: i64,
        script: &str,
        virtual_users: u32,
        duration: &str,
        cancel: &CancellationToken,
    ) -> Bracketed<String> {
        if let Err(e) = validate_duration(duration) {
            return Bracketed {
                result: Err(e),
                teardown: None,
            };
        }
        let tool = self.load_tool.as_ref();
        self.materializer
            .with_runtime(
                compose_content,
                session_id,
                RuntimePurpose::Quick,
                cancel,
                |handle| async move {
                    let out = execute_script(
                        tool,
                        &handle,
                        script,
                        virtual_users,
                        duration,
                        None,
                        None,
                        cancel,
                    )
                    .await?;
                    Ok(out.combined)
                },
            )
            .await
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_script(
    tool: &dyn LoadTool,
    handle: &RuntimeHandle,
    script: &str,
    virtual_users: u32,
    duration: &str,
    json_out: Option<&Path>,
    run_id: Option<i64>,
    cancel: &CancellationToken,
) -> PerfResult<CommandOutput> {
    let script_path = handle.workdir.join(SCRIPT_FILE_NAME);
    tokio::fs::write(&script_path, script)
        .await
        .map_err(|e| PerfError::Execution {
            message: format!("failed to write test script: {e}"),
            output: String::new(),
        })?;

    tracing::info!(
        event = "load_tool_start",
        project = %handle.project,
        run_id = ?run_id,
        vus = virtual_users,
        duration = %duration
    );
    let started = Instant::now();
    let invocation = LoadInvocation {
        script: &script_path,
        virtual_users,
        duration,
        json_out,
        workdir: &handle.workdir,
    };
    let res = tool.run(&invocation, cancel).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match res {
        Ok(out) if out.success => {
            tracing::info!(
                event = "load_tool_done",
                run_id = ?run_id,
                duration_ms,
                outcome = "ok",
                output_bytes = out.combined.len()
            );
            Ok(out)
        }
        Ok(out) => {
            tracing::error!(
                event = "load_tool_done",
                run_id = ?run_id,
                duration_ms,
                outcome = "failed",
                exit_code = ?out.exit_code
            );
            let mut message = out.status_text();
            if let Some(id) = run_id {
                message.push_str(&format!("; run {id} left incomplete"));
            }
            Err(PerfError::Execution {
                message,
                output: out.combined,
            })
        }
        Err(ProcessError::Cancelled) => Err(PerfError::Cancelled),
        Err(e) => {
            tracing::error!(event = "load_tool_done", run_id = ?run_id, duration_ms, outcome = "spawn_failed", error = %e);
            Err(PerfError::Execution {
                message: e.to_string(),
                output: String::new(),
            })
        }
    }
}

/// k6 duration strings: one or more `<number><unit>` groups with units
/// `ms`, `s`, `m`, `h`; a bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let (unit_secs, len) = if rest.starts_with("ms") {
            (0.001, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return None;
        };
        rest = &rest[len..];
        let part = Duration::try_from_secs_f64(value * unit_secs).ok()?;
        total = total.checked_add(part)?;
    }
    Some(total)
}

pub fn validate_duration(s: &str) -> PerfResult<()> {
    match parse_duration(s) {
        Some(d) if !d.is_zero() => Ok(()),
        _ => Err(PerfError::Validation(format!("invalid duration '{s}'"))),
    }
}

/// k6 refuses to start with zero virtual users.
pub fn validate_virtual_users(vus: u32) -> PerfResult<()> {
    if vus == 0 {
        return Err(PerfError::Validation(
            "virtual users must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("2x"), None);
        assert_eq!(parse_duration("m"), None);
        assert!(validate_duration("0s").is_err());
        assert!(validate_duration("").is_err());
    }

    #[test]
    fn oversized_durations_are_invalid_not_fatal() {
        assert_eq!(parse_duration("99999999999999999999h"), None);
        assert_eq!(parse_duration("1e400s"), None);
        assert_eq!(parse_duration("10000000000000000000s10000000000000000000s"), None);
        let err = validate_duration("99999999999999999999h").unwrap_err();
        assert_eq!(err.code(), "E_VALIDATION");
    }

    #[test]
    fn zero_virtual_users_is_invalid() {
        assert_eq!(validate_virtual_users(0).unwrap_err().code(), "E_VALIDATION");
        assert!(validate_virtual_users(1).is_ok());
    }

    #[test]
    fn k6_args_include_json_output_when_requested() {
        let inv = LoadInvocation {
            script: Path::new("/w/test.js"),
            virtual_users: 5,
            duration: "30s",
            json_out: Some(Path::new("/w/results.json")),
            workdir: Path::new("/w"),
        };
        assert_eq!(
            K6::args(&inv),
            vec!["run", "--vus", "5", "--duration", "30s", "--out", "json=/w/results.json", "/w/test.js"]
        );

        let inv = LoadInvocation { json_out: None, ..inv };
        assert_eq!(K6::args(&inv).len(), 6);
    }
}
