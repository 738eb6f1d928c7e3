use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};
use wayfinder_core::{CapabilityResult, Error, ResultSegment, Result};

use crate::mcp::transport::{CapabilityChannel, RemoteCapability};

// ─── JSON-RPC types ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Reply routed back to a waiting request.
enum Reply {
    Result(Value),
    /// The server answered with a JSON-RPC error object.
    Remote(String),
    /// The channel died before an answer arrived.
    Closed(String),
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

// ─── Command line ─────────────────────────────────────────────────────────────

/// Split a configured command line on whitespace into executable and arguments.
pub fn parse_command_line(command_line: &str) -> Result<(String, Vec<String>)> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().unwrap_or_default();
    if program.is_empty() {
        return Err(Error::Config(format!(
            "capability service command is empty: {:?}",
            command_line
        )));
    }
    Ok((program.to_string(), parts.map(str::to_string).collect()))
}

// ─── MCP Client ───────────────────────────────────────────────────────────────

/// Newline-delimited JSON-RPC channel to a capability service child process.
pub struct McpClient {
    server_name: String,
    stdin: Mutex<ChildStdin>,
    next_id: AtomicU64,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    child: Mutex<Option<Child>>,
}

impl McpClient {
    /// Launch the service child process and perform the initialization handshake.
    pub async fn start(
        server_name: &str,
        command_line: &str,
        env: &HashMap<String, String>,
        cwd: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let (program, args) = parse_command_line(command_line)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Transport(format!(
                "MCP[{}]: failed to spawn '{}': {}",
                server_name, program, e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport(format!("MCP[{}]: no stdin", server_name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport(format!("MCP[{}]: no stdout", server_name)))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        // Background task: read newline-delimited JSON-RPC responses from stdout
        tokio::spawn(Self::reader_task(
            stdout,
            pending.clone(),
            closed.clone(),
            server_name.to_string(),
        ));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_task(stderr, server_name.to_string()));
        }

        info!(server = %server_name, program = %program, pid = ?child.id(), "Capability service spawned");

        let client = Self {
            server_name: server_name.to_string(),
            stdin: Mutex::new(stdin),
            next_id: AtomicU64::new(1),
            pending,
            closed,
            request_timeout,
            child: Mutex::new(Some(child)),
        };

        if let Err(e) = client.initialize().await {
            client.shutdown().await;
            return Err(e);
        }

        Ok(client)
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let write_err =
            |e: std::io::Error| Error::Transport(format!("MCP[{}]: write error: {}", self.server_name, e));
        stdin.write_all(line.as_bytes()).await.map_err(write_err)?;
        stdin.write_all(b"\n").await.map_err(write_err)?;
        stdin.flush().await.map_err(write_err)?;
        Ok(())
    }

    /// Send a JSON-RPC request and wait for the response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!(
                "MCP[{}]: channel closed",
                self.server_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
            // The reader sets `closed` before draining; re-check under the lock.
            if self.closed.load(Ordering::SeqCst) {
                map.remove(&id);
                return Err(Error::Transport(format!(
                    "MCP[{}]: channel closed",
                    self.server_name
                )));
            }
        }

        let line = serde_json::to_string(&req)?;
        debug!(server = %self.server_name, id, method, "MCP → request");

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(reply) => reply,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout(format!(
                    "MCP[{}]: {} did not answer within {:?}",
                    self.server_name, method, self.request_timeout
                )));
            }
        };

        match reply {
            Ok(Reply::Result(value)) => Ok(value),
            Ok(Reply::Remote(msg)) => Err(Error::CapabilityExecution(format!(
                "MCP[{}]: {}",
                self.server_name, msg
            ))),
            Ok(Reply::Closed(msg)) => Err(Error::Transport(format!(
                "MCP[{}]: {}",
                self.server_name, msg
            ))),
            Err(_) => Err(Error::Transport(format!(
                "MCP[{}]: server closed",
                self.server_name
            ))),
        }
    }

    /// MCP initialize + initialized notification
    async fn initialize(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "wayfinder",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let result = self.request("initialize", Some(params)).await?;
        debug!(server = %self.server_name, ?result, "MCP initialized");

        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.write_line(&notif.to_string()).await
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(server = %self.server_name, error = %e, "MCP: kill failed (already exited?)");
            }
            match child.wait().await {
                Ok(status) => info!(server = %self.server_name, %status, "Capability service stopped"),
                Err(e) => warn!(server = %self.server_name, error = %e, "MCP: failed to reap child"),
            }
        }
        let mut map = self.pending.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Reply::Closed("channel closed".to_string()));
        }
    }

    /// Background reader task. Dispatches incoming JSON-RPC responses to waiting callers.
    async fn reader_task(
        stdout: ChildStdout,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
        server_name: String,
    ) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    let preview: String = line.chars().take(200).collect();
                    debug!(server = %server_name, "MCP ← {}", preview);
                    match serde_json::from_str::<JsonRpcResponse>(&line) {
                        Ok(resp) => {
                            if let Some(id) = resp.id {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let payload = if let Some(err) = resp.error {
                                        Reply::Remote(format!(
                                            "JSON-RPC error {}: {}",
                                            err.code, err.message
                                        ))
                                    } else {
                                        Reply::Result(resp.result.unwrap_or(Value::Null))
                                    };
                                    let _ = tx.send(payload);
                                }
                            }
                            // Notifications (no id) are silently ignored.
                        }
                        Err(e) => {
                            warn!(server = %server_name, "MCP: failed to parse response: {}", e);
                        }
                    }
                }
                Ok(Some(_)) => {} // blank line
                Ok(None) => {
                    if !closed.swap(true, Ordering::SeqCst) {
                        error!(server = %server_name, "MCP: stdout closed");
                    }
                    break;
                }
                Err(e) => {
                    closed.store(true, Ordering::SeqCst);
                    error!(server = %server_name, "MCP: read error: {}", e);
                    break;
                }
            }
        }

        let mut map = pending.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Reply::Closed("server stdout closed".to_string()));
        }
    }

    /// Diagnostics only: stderr lines go to the log, never to the protocol.
    async fn stderr_task(stderr: ChildStderr, server_name: String) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!(server = %server_name, "MCP stderr: {}", line);
            }
        }
    }
}

/// Turn a `tools/call` result into segments. Anything that is not a
/// `{content: [...]}` object yields the empty (no content) result.
fn decode_call_result(result: Value) -> Result<CapabilityResult> {
    // MCP returns { content: [...], isError: bool }
    if let Some(true) = result.get("isError").and_then(|v| v.as_bool()) {
        let msg = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|item| item.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("MCP tool returned an error");
        return Err(Error::CapabilityExecution(msg.to_string()));
    }

    let Some(items) = result.get("content").and_then(|c| c.as_array()) else {
        return Ok(CapabilityResult::empty());
    };
    let segments = items
        .iter()
        .filter_map(|item| serde_json::from_value::<ResultSegment>(item.clone()).ok())
        .collect();
    Ok(CapabilityResult::new(segments))
}

#[async_trait]
impl CapabilityChannel for McpClient {
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CapabilityResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });
        let result = self.request("tools/call", Some(params)).await?;
        decode_call_result(result)
    }

    async fn list_tools(&self) -> Result<Vec<RemoteCapability>> {
        let result = self.request("tools/list", None).await?;
        let tools: Vec<RemoteCapability> =
            serde_json::from_value(result.get("tools").cloned().unwrap_or(Value::Array(vec![])))
                .map_err(|e| {
                    Error::Transport(format!("MCP[{}]: parse tools: {}", self.server_name, e))
                })?;
        debug!(server = %self.server_name, count = tools.len(), "MCP tools loaded");
        Ok(tools)
    }

    async fn close(&self) {
        self.shutdown().await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
