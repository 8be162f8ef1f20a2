//! Lenient readers for tool arguments. Clients send numbers and booleans
//! either as JSON values or as strings; both are accepted.

use super::ToolError;
use serde_json::Value;

pub fn opt_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    opt_str(args, name)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::invalid_args(format!("'{name}' is required")))
}

pub fn str_or<'a>(args: &'a Value, name: &str, default: &'a str) -> &'a str {
    opt_str(args, name)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Record identifier, as a number or a numeric string.
pub fn required_id(args: &Value, name: &str) -> Result<i64, ToolError> {
    let v = args
        .get(name)
        .ok_or_else(|| ToolError::invalid_args(format!("'{name}' is required")))?;
    as_i64(v).ok_or_else(|| ToolError::invalid_args(format!("'{name}' must be an integer id")))
}

/// Non-negative count with a default for an absent or null value.
pub fn u32_or(args: &Value, name: &str, default: u32) -> Result<u32, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => as_i64(v)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| ToolError::invalid_args(format!("'{name}' must be a non-negative integer"))),
    }
}

pub fn bool_or(args: &Value, name: &str, default: bool) -> Result<bool, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ToolError::invalid_args(format!("'{name}' must be \"true\" or \"false\""))),
        },
        Some(_) => Err(ToolError::invalid_args(format!("'{name}' must be a boolean"))),
    }
}
