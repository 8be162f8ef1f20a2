use super::args;
use super::{render_outcome, ToolContext, ToolError, ToolOutput};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub async fn run_performance_test(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let test_id = args::required_id(args, "testId")?;
    let vus = args::u32_or(args, "vus", 10)?;
    let duration = args::str_or(args, "duration", "30s");
    let outcome = ctx
        .orchestrator
        .run_performance_test(test_id, vus, duration, cancel)
        .await;
    Ok(render_outcome(outcome))
}
