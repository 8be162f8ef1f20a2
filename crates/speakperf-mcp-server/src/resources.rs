use serde_json::Value;
use speakperf_core::storage::Store;
use std::fmt::Write as _;

const RECENT_LIMIT: u32 = 20;

pub const SCHEMA_URI: &str = "sqlite://schema";
pub const SESSIONS_URI: &str = "sqlite://sessions";
pub const COMPOSE_FILES_URI: &str = "sqlite://compose-files";
pub const TEST_RUNS_URI: &str = "sqlite://test-runs";

pub fn list_resources() -> Vec<Value> {
    vec![
        serde_json::json!({
            "uri": SCHEMA_URI,
            "name": "Database schema",
            "description": "DDL of every table in the result store",
            "mimeType": "text/plain"
        }),
        serde_json::json!({
            "uri": SESSIONS_URI,
            "name": "Recent test sessions",
            "description": "Last 20 sessions with source and service count",
            "mimeType": "application/json"
        }),
        serde_json::json!({
            "uri": COMPOSE_FILES_URI,
            "name": "Recent compose files",
            "description": "Last 20 stored compose files with size in bytes",
            "mimeType": "application/json"
        }),
        serde_json::json!({
            "uri": TEST_RUNS_URI,
            "name": "Recent test runs",
            "description": "Last 20 runs with test and session names",
            "mimeType": "application/json"
        }),
    ]
}

/// `Ok(None)` for an unknown URI.
pub fn read_resource(store: &Store, uri: &str) -> anyhow::Result<Option<Value>> {
    let (mime, text) = match uri {
        SCHEMA_URI => {
            let mut out = String::new();
            for (name, sql) in store.schema_tables()? {
                let _ = writeln!(out, "-- {name}\n{sql};\n");
            }
            ("text/plain", out)
        }
        SESSIONS_URI => (
            "application/json",
            serde_json::to_string_pretty(&store.recent_sessions(RECENT_LIMIT)?)?,
        ),
        COMPOSE_FILES_URI => (
            "application/json",
            serde_json::to_string_pretty(&store.recent_compose_files(RECENT_LIMIT)?)?,
        ),
        TEST_RUNS_URI => (
            "application/json",
            serde_json::to_string_pretty(&store.recent_runs(RECENT_LIMIT)?)?,
        ),
        _ => return Ok(None),
    };
    Ok(Some(serde_json::json!({
        "contents": [{ "uri": uri, "mimeType": mime, "text": text }]
    })))
}
