use super::args;
use super::{render_outcome, ToolContext, ToolError, ToolOutput};
use serde_json::Value;
use speakperf_core::generator::Intensity;
use tokio_util::sync::CancellationToken;

pub async fn test_application(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let source = args::required_str(args, "composeSource")?;
    let test_type = args::str_or(args, "testType", "standard");
    let intensity = Intensity::parse(test_type).ok_or_else(|| {
        ToolError::invalid_args(format!(
            "testType must be one of quick, standard, thorough (got '{test_type}')"
        ))
    })?;
    let endpoints = args::opt_str(args, "endpoints");

    tracing::info!(
        event = "automated_test_requested",
        source = %source,
        intensity = intensity.as_str()
    );
    let outcome = ctx
        .orchestrator
        .test_application(source, intensity, endpoints, cancel)
        .await;
    Ok(render_outcome(outcome))
}

pub async fn quick_performance_test(
    ctx: &ToolContext,
    args: &Value,
    cancel: &CancellationToken,
) -> Result<ToolOutput, ToolError> {
    let source = args::required_str(args, "composeSource")?;
    let vus = args::u32_or(args, "vus", 50)?;
    let duration = args::str_or(args, "duration", "2m");
    let outcome = ctx
        .orchestrator
        .quick_performance_test(source, vus, duration, cancel)
        .await;
    Ok(render_outcome(outcome))
}
