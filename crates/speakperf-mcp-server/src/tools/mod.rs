use serde_json::Value;
use speakperf_core::{Orchestrator, Outcome, PerfError, Report};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::SchemaCache;
use crate::config::ServerConfig;

pub mod args;
pub mod automated;
pub mod generate;
pub mod results;
pub mod run;
pub mod setup;

pub struct ToolContext {
    pub orchestrator: Arc<Orchestrator>,
    pub cfg: ServerConfig,
    pub schemas: SchemaCache,
}

impl ToolContext {
    pub fn new(orchestrator: Arc<Orchestrator>, cfg: ServerConfig) -> Self {
        let schemas = SchemaCache::new(cfg.cache_entries);
        Self {
            orchestrator,
            cfg,
            schemas,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        }
    }

    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self {
            code: "E_INVALID_ARGS".to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("Error [{}]: {}\n", self.code, self.message);
        if let Some(output) = self.details.as_ref().and_then(|d| d.get("output")).and_then(Value::as_str) {
            let _ = write!(out, "\nOutput:\n```\n{}\n```\n", output.trim_end());
        }
        if let Some(violations) = self.details.as_ref().and_then(|d| d.get("violations")).and_then(Value::as_array) {
            for v in violations.iter().filter_map(Value::as_str) {
                let _ = writeln!(out, "- {v}");
            }
        }
        out
    }
}

impl From<PerfError> for ToolError {
    fn from(e: PerfError) -> Self {
        let err = ToolError::new(e.code(), &e.to_string());
        match e.output() {
            Some(output) => err.with_details(serde_json::json!({ "output": output })),
            None => err,
        }
    }
}

/// Text payload of an MCP `CallToolResult`.
#[derive(Debug)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn to_call_result(&self) -> Value {
        serde_json::json!({
            "content": [{ "type": "text", "text": self.text }],
            "isError": self.is_error
        })
    }
}

impl From<ToolError> for ToolOutput {
    fn from(e: ToolError) -> Self {
        Self {
            text: e.render(),
            is_error: true,
        }
    }
}

/// Renders an orchestrator outcome, success or failure, with the cleanup
/// section appended whenever a teardown went wrong.
pub fn render_outcome<T: Report>(outcome: Outcome<T>) -> ToolOutput {
    let cleanup = outcome.cleanup_section();
    let mut out = match outcome.result {
        Ok(report) => ToolOutput::text(report.render()),
        Err(e) => ToolOutput::from(ToolError::from(e)),
    };
    if let Some(section) = cleanup {
        if !out.text.ends_with('\n') {
            out.text.push('\n');
        }
        out.text.push('\n');
        out.text.push_str(&section);
    }
    out
}

pub fn list_tools() -> Vec<Value> {
    let number = serde_json::json!({ "type": ["number", "string"] });
    let flag = serde_json::json!({ "type": ["boolean", "string"] });
    let id = serde_json::json!({ "type": ["string", "integer"] });
    let vus = serde_json::json!({ "type": ["number", "string"], "minimum": 1 });
    vec![
        serde_json::json!({
            "name": "setup_test_environment",
            "description": "Load a docker-compose file from a URL or local path and open a test session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "composePath": { "type": "string", "minLength": 1 }
                },
                "required": ["composePath"]
            }
        }),
        serde_json::json!({
            "name": "discover_api_specs",
            "description": "Find OpenAPI/Swagger specifications for the services of the latest session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "specPaths": { "type": "string" },
                    "autoDiscover": flag
                }
            }
        }),
        serde_json::json!({
            "name": "generate_api_tests",
            "description": "Generate a k6 load test script from a discovered API specification.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "specId": id,
                    "endpoints": { "type": "string" },
                    "testType": { "type": "string", "enum": ["load", "stress", "spike"] }
                },
                "required": ["specId"]
            }
        }),
        serde_json::json!({
            "name": "create_ui_test",
            "description": "Create a browser test from natural-language instructions.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": { "type": "string", "minLength": 1 },
                    "instructions": { "type": "string" },
                    "testName": { "type": "string", "minLength": 1 }
                },
                "required": ["url", "instructions"]
            }
        }),
        serde_json::json!({
            "name": "run_performance_test",
            "description": "Run a stored test against a fresh copy of its session's environment.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "testId": id,
                    "vus": vus,
                    "duration": { "type": "string" }
                },
                "required": ["testId"]
            }
        }),
        serde_json::json!({
            "name": "analyze_results",
            "description": "Check a test run against SLAs and optionally against history.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "runId": id,
                    "compareHistory": flag
                },
                "required": ["runId"]
            }
        }),
        serde_json::json!({
            "name": "query_test_history",
            "description": "Return recorded metrics, newest first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "endpoint": { "type": "string" },
                    "days": number
                }
            }
        }),
        serde_json::json!({
            "name": "test_application",
            "description": "Set up, discover, generate, run and report in one call.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "composeSource": { "type": "string", "minLength": 1 },
                    "testType": { "type": "string", "enum": ["quick", "standard", "thorough"] },
                    "endpoints": { "type": "string" }
                },
                "required": ["composeSource"]
            }
        }),
        serde_json::json!({
            "name": "quick_performance_test",
            "description": "Bring up an environment and run a health-check load test against it.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "composeSource": { "type": "string", "minLength": 1 },
                    "vus": vus,
                    "duration": { "type": "string" }
                },
                "required": ["composeSource"]
            }
        }),
    ]
}

fn tool_schema(name: &str) -> Option<Value> {
    list_tools()
        .into_iter()
        .find(|t| t.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|t| t.get("inputSchema").cloned())
}

/// Schema validation plus per-field size limits. Nothing has been touched
/// when this fails.
pub fn validate_args(ctx: &ToolContext, name: &str, args: &Value) -> Result<(), ToolError> {
    let schema = tool_schema(name)
        .ok_or_else(|| ToolError::new("E_UNKNOWN_TOOL", &format!("Unknown tool: {name}")))?;

    let compiled = ctx
        .schemas
        .get_or_compile(name, &schema)
        .map_err(|e| ToolError::new("E_SCHEMA_COMPILE", &e))?;

    if let Err(errors) = compiled.validate(args) {
        let violations: Vec<Value> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    Value::String(e.to_string())
                } else {
                    Value::String(format!("{path}: {e}"))
                }
            })
            .collect();
        return Err(ToolError::invalid_args(format!("invalid arguments for {name}"))
            .with_details(serde_json::json!({ "violations": violations })));
    }

    if let Some(obj) = args.as_object() {
        for (field, value) in obj {
            if let Some(s) = value.as_str() {
                if s.len() > ctx.cfg.max_field_bytes {
                    return Err(ToolError::invalid_args(format!(
                        "field '{field}' is {} bytes, limit is {}",
                        s.len(),
                        ctx.cfg.max_field_bytes
                    )));
                }
            }
        }
    }
    Ok(())
}

pub async fn handle_call(
    ctx: &ToolContext,
    name: &str,
    args: &Value,
    cancel: &CancellationToken,
) -> ToolOutput {
    if let Err(e) = validate_args(ctx, name, args) {
        return e.into();
    }

    let res = match name {
        "setup_test_environment" => setup::setup_test_environment(ctx, args, cancel).await,
        "discover_api_specs" => setup::discover_api_specs(ctx, args, cancel).await,
        "generate_api_tests" => generate::generate_api_tests(ctx, args),
        "create_ui_test" => generate::create_ui_test(ctx, args),
        "run_performance_test" => run::run_performance_test(ctx, args, cancel).await,
        "analyze_results" => results::analyze_results(ctx, args),
        "query_test_history" => results::query_test_history(ctx, args),
        "test_application" => automated::test_application(ctx, args, cancel).await,
        "quick_performance_test" => automated::quick_performance_test(ctx, args, cancel).await,
        _ => Err(ToolError::new("E_UNKNOWN_TOOL", &format!("Unknown tool: {name}"))),
    };
    res.unwrap_or_else(ToolOutput::from)
}
