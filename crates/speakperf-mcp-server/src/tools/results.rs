use super::args;
use super::{render_outcome, ToolContext, ToolError, ToolOutput};
use serde_json::Value;

pub fn analyze_results(ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
    let run_id = args::required_id(args, "runId")?;
    let compare = args::bool_or(args, "compareHistory", false)?;
    Ok(render_outcome(ctx.orchestrator.analyze_results(run_id, compare)))
}

/// JSON array of `{timestamp, endpoint, avgTime, errorRate, rps}`, newest first.
pub fn query_test_history(ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
    let endpoint = args::opt_str(args, "endpoint").filter(|s| !s.trim().is_empty());
    let days = args::u32_or(args, "days", 7)?;
    let points = ctx.orchestrator.query_history(endpoint, days)?;
    let text = serde_json::to_string_pretty(&points)
        .map_err(|e| ToolError::new("E_INTERNAL", &e.to_string()))?;
    Ok(ToolOutput::text(text))
}
