use super::args;
use super::{render_outcome, ToolContext, ToolError, ToolOutput};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub async fn setup_test_environment(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let source = args::required_str(args, "composePath")?;
    let outcome = ctx.orchestrator.setup_environment(source, cancel).await;
    Ok(render_outcome(outcome))
}

pub async fn discover_api_specs(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let spec_paths = args::opt_str(args, "specPaths");
    let auto = args::bool_or(args, "autoDiscover", true)?;
    let outcome = ctx.orchestrator.discover_specs(spec_paths, auto, cancel).await;
    Ok(render_outcome(outcome))
}
