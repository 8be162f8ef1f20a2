use super::args;
use super::{render_outcome, ToolContext, ToolError, ToolOutput};
use serde_json::Value;

pub fn generate_api_tests(ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
    let spec_id = args::required_id(args, "specId")?;
    let endpoints = args::opt_str(args, "endpoints");
    let test_type = args::str_or(args, "testType", "load");
    Ok(render_outcome(
        ctx.orchestrator.generate_api_tests(spec_id, endpoints, test_type),
    ))
}

pub fn create_ui_test(ctx: &ToolContext, args: &Value) -> Result<ToolOutput, ToolError> {
    let url = args::required_str(args, "url")?;
    let instructions = args::opt_str(args, "instructions").unwrap_or_default();
    let name = args::str_or(args, "testName", "ui-test");
    Ok(render_outcome(
        ctx.orchestrator.create_ui_test(url, instructions, name),
    ))
}
