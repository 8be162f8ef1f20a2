use crate::resources;
use crate::tools::{self, ToolContext};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

static RID: AtomicU64 = AtomicU64::new(1);

fn next_rid() -> String {
    let n = RID.fetch_add(1, Ordering::Relaxed);
    format!("r-{n:06}")
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Option<Value>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Cancellation tokens of in-flight `tools/call` requests, keyed by the
/// serialized JSON-RPC id.
#[derive(Clone, Default)]
struct InFlight {
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl InFlight {
    fn key(id: &Value) -> String {
        id.to_string()
    }

    fn register(&self, id: &Value, token: CancellationToken) {
        if let Ok(mut map) = self.tokens.lock() {
            map.insert(Self::key(id), token);
        }
    }

    fn remove(&self, id: &Value) {
        if let Ok(mut map) = self.tokens.lock() {
            map.remove(&Self::key(id));
        }
    }

    fn cancel(&self, id: &Value) -> bool {
        match self.tokens.lock() {
            Ok(map) => match map.get(&Self::key(id)) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    fn cancel_all(&self) {
        if let Ok(map) = self.tokens.lock() {
            for token in map.values() {
                token.cancel();
            }
        }
    }
}

type Outbox = mpsc::UnboundedSender<JsonRpcResponse>;

pub struct Server;

impl Server {
    pub async fn run(ctx: Arc<ToolContext>) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        Self::serve(ctx, stdin, tokio::io::stdout()).await
    }

    /// Reads one JSON-RPC message per line. Tool calls run on their own
    /// tasks; every response goes through a single writer. On end of input
    /// in-flight calls are cancelled and awaited, so their runtimes are
    /// released before this returns.
    pub async fn serve<R, W>(ctx: Arc<ToolContext>, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let write_loop = tokio::spawn(async move {
            while let Some(resp) = rx.recv().await {
                let mut line = serde_json::to_string(&resp)?;
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
            }
            Ok::<_, anyhow::Error>(())
        });

        let inflight = InFlight::default();
        let mut calls = JoinSet::new();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            // reap finished calls so the set does not grow unbounded
            while calls.try_join_next().is_some() {}

            let rid = next_rid();
            if line.len() > ctx.cfg.max_msg_bytes {
                tracing::warn!(
                    target: "speakperf_mcp_server",
                    event = "limit_exceeded",
                    rid = %rid,
                    bytes_in = line.len(),
                    max = ctx.cfg.max_msg_bytes
                );
                let err = tools::ToolError::new(
                    "E_LIMIT_EXCEEDED",
                    &format!("message bytes={} > max={}", line.len(), ctx.cfg.max_msg_bytes),
                );
                let _ = tx.send(JsonRpcResponse::ok(
                    None,
                    tools::ToolOutput::from(err).to_call_result(),
                ));
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let req: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(event = "json_parse_error", rid = %rid, error = %e);
                    continue;
                }
            };

            match req.method.as_str() {
                "tools/call" => match req.params {
                    Some(params) => {
                        let token = CancellationToken::new();
                        if let Some(id) = &req.id {
                            inflight.register(id, token.clone());
                        }
                        calls.spawn(call_tool(
                            ctx.clone(),
                            tx.clone(),
                            inflight.clone(),
                            rid,
                            req.id,
                            params,
                            token,
                        ));
                    }
                    None => {
                        let _ = tx.send(JsonRpcResponse::error(
                            req.id,
                            -32602,
                            "Missing params".to_string(),
                        ));
                    }
                },
                "notifications/cancelled" => {
                    let target = req.params.as_ref().and_then(|p| p.get("requestId"));
                    let found = target.map(|id| inflight.cancel(id)).unwrap_or(false);
                    tracing::info!(
                        event = "request_cancelled",
                        rid = %rid,
                        request_id = ?target,
                        found = found
                    );
                }
                "notifications/initialized" => {
                    tracing::info!(event = "initialized", rid = %rid);
                }
                _ => {
                    if let Some(resp) = dispatch(&ctx, &rid, req) {
                        let _ = tx.send(resp);
                    }
                }
            }
        }

        tracing::info!(event = "input_closed", in_flight = calls.len());
        inflight.cancel_all();
        while calls.join_next().await.is_some() {}
        drop(tx);
        write_loop.await??;
        Ok(())
    }
}

/// Synchronous methods. `None` means nothing is sent back.
fn dispatch(ctx: &ToolContext, rid: &str, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let resp = match req.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            req.id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {},
                    "resources": {}
                },
                "serverInfo": {
                    "name": "speakperf-mcp-server",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),
        "ping" => JsonRpcResponse::ok(req.id, serde_json::json!({})),
        "tools/list" => JsonRpcResponse::ok(
            req.id,
            serde_json::json!({ "tools": tools::list_tools() }),
        ),
        "resources/list" => JsonRpcResponse::ok(
            req.id,
            serde_json::json!({ "resources": resources::list_resources() }),
        ),
        "resources/read" => {
            let uri = req
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(Value::as_str);
            match uri {
                None => JsonRpcResponse::error(req.id, -32602, "Missing params".to_string()),
                Some(uri) => match resources::read_resource(ctx.orchestrator.store(), uri) {
                    Ok(Some(contents)) => JsonRpcResponse::ok(req.id, contents),
                    Ok(None) => {
                        JsonRpcResponse::error(req.id, -32602, format!("Unknown resource: {uri}"))
                    }
                    Err(e) => {
                        tracing::error!(event = "resource_read_failed", rid = %rid, uri = %uri, error = %e);
                        JsonRpcResponse::error(req.id, -32603, format!("{e:#}"))
                    }
                },
            }
        }
        _ => {
            // notifications get no reply, even unknown ones
            req.id.as_ref()?;
            JsonRpcResponse::error(req.id, -32601, format!("Method not found: {}", req.method))
        }
    };
    Some(resp)
}

async fn call_tool(
    ctx: Arc<ToolContext>,
    tx: Outbox,
    inflight: InFlight,
    rid: String,
    id: Option<Value>,
    params: Value,
    cancel: CancellationToken,
) {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let default_args = serde_json::json!({});
    let args = match params.get("arguments") {
        Some(Value::Null) | None => &default_args,
        Some(a) => a,
    };
    let args_bytes = serde_json::to_vec(args).map(|b| b.len()).unwrap_or(0);
    let start = std::time::Instant::now();

    tracing::info!(
        event = "tool_call_start",
        rid = %rid,
        rpc_id = ?id,
        tool = %name,
        args_bytes = args_bytes,
    );

    // a panicking handler must still produce a reply for its id
    let worker = {
        let ctx = ctx.clone();
        let name = name.clone();
        let args = args.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { tools::handle_call(&ctx, &name, &args, &cancel).await })
    };
    let output = match worker.await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(
                event = "tool_call_crash",
                rid = %rid,
                rpc_id = ?id,
                tool = %name,
                panic = e.is_panic(),
                error = %e
            );
            tools::ToolOutput::from(tools::ToolError::new(
                "E_INTERNAL",
                &format!("tool '{name}' failed unexpectedly"),
            ))
        }
    };
    let dur = start.elapsed().as_millis() as u64;

    if output.is_error {
        tracing::info!(
            event = "tool_call_done",
            rid = %rid,
            rpc_id = ?id,
            tool = %name,
            duration_ms = dur,
            outcome = "app_error",
            cancelled = cancel.is_cancelled()
        );
    } else {
        tracing::info!(
            event = "tool_call_done",
            rid = %rid,
            rpc_id = ?id,
            tool = %name,
            duration_ms = dur,
            outcome = "ok"
        );
    }

    if let Some(id) = &id {
        inflight.remove(id);
    }
    if tx
        .send(JsonRpcResponse::ok(id, output.to_call_result()))
        .is_err()
    {
        tracing::error!(event = "response_dropped", rid = %rid, tool = %name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_cancels_by_id() {
        let inflight = InFlight::default();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        inflight.register(&serde_json::json!(1), a.clone());
        inflight.register(&serde_json::json!("1"), b.clone());

        assert!(inflight.cancel(&serde_json::json!(1)));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());

        inflight.remove(&serde_json::json!("1"));
        assert!(!inflight.cancel(&serde_json::json!("1")));
    }

    #[test]
    fn rids_are_sequential() {
        let a = next_rid();
        let b = next_rid();
        assert!(a.starts_with("r-") && b.starts_with("r-"));
        assert_ne!(a, b);
    }
}
