//! MCP stdio server
//!
//! Reads newline-delimited JSON-RPC from a reader, dispatches each request on
//! its own task and writes responses back through a single writer task, so a
//! long `generate_audio` call never blocks `ping` or `tools/list`.

use crate::protocol::{
    error_codes, CallToolParams, CallToolResult, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpTool, ServerCapabilities,
    ServerInfo, ToolsCapability, JSONRPC_VERSION, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::tools::{ToolError, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct McpServer {
    registry: ToolRegistry,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            info: ServerInfo {
                name: "voxpipe".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle one protocol line. Returns the serialized response, or `None`
    /// for notifications and blank lines.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(target: "mcp_server", error = %e, "Unparseable message");
                let err = JsonRpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {}", e));
                return encode(&JsonRpcResponse::failure(Value::Null, err));
            }
        };

        let request: JsonRpcRequest = match serde_json::from_value(value.clone()) {
            Ok(r) => r,
            Err(e) => {
                let id = value.get("id").cloned().unwrap_or(Value::Null);
                let err =
                    JsonRpcError::new(error_codes::INVALID_REQUEST, format!("Invalid request: {}", e));
                return encode(&JsonRpcResponse::failure(id, err));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            debug!(target: "mcp_server", version = %request.jsonrpc, "Unexpected jsonrpc version");
        }

        let Some(id) = request.id.clone() else {
            self.handle_notification(&request.method);
            return None;
        };

        let response = match self.handle_request(&request.method, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err),
        };
        encode(&response)
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => info!(target: "mcp_server", "Client initialized"),
            "notifications/cancelled" => debug!(target: "mcp_server", "Client cancelled a request"),
            other => debug!(target: "mcp_server", method = %other, "Ignoring notification"),
        }
    }

    /// Dispatch a request by method name
    pub async fn handle_request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        debug!(target: "mcp_server", method = %method, "Request");
        match method {
            "initialize" => self.initialize(params),
            "ping" => Ok(json!({})),
            "tools/list" => to_value(&self.list_tools()),
            "tools/call" => self.call_tool(params).await,
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?,
            None => InitializeParams::default(),
        };

        // Echo the client's version when supported, otherwise offer ours
        let version = params
            .protocol_version
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()))
            .unwrap_or_else(|| PROTOCOL_VERSION.to_string());

        if let Some(client) = &params.client_info {
            info!(target: "mcp_server", client = %client.name, client_version = %client.version, protocol = %version, "Initialize");
        }

        to_value(&InitializeResult {
            protocol_version: version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: self.info.clone(),
        })
    }

    fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self
                .registry
                .list_tools()
                .iter()
                .map(|t| McpTool {
                    name: t.name(),
                    description: Some(t.description()),
                    input_schema: t.parameters(),
                })
                .collect(),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing params"))
            .and_then(|p| serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string())))?;

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let result = match self.registry.call(&params.name, arguments).await {
            Ok(content) => CallToolResult::ok(content),
            Err(ToolError::NotFound(name)) => {
                return Err(JsonRpcError::invalid_params(format!("Unknown tool: {}", name)));
            }
            Err(e) => CallToolResult::error(e.to_string()),
        };
        to_value(&result)
    }

    /// Serve until the reader reaches end of input. In-flight calls finish
    /// and are answered before this returns.
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                writer.write_all(frame.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut in_flight = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let server = self.clone();
            let tx = tx.clone();
            in_flight.spawn(async move {
                if let Some(frame) = server.handle_line(&line).await {
                    let _ = tx.send(frame);
                }
            });
            // Reap finished calls as we go
            while in_flight.try_join_next().is_some() {}
        }

        debug!(target: "mcp_server", pending = in_flight.len(), "Input closed");
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!(target: "mcp_server", error = %e, "Request task failed");
            }
        }
        drop(tx);

        match writer_task.await {
            Ok(res) => res,
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(error_codes::INTERNAL_ERROR, e.to_string()))
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(s) => Some(s),
        Err(e) => {
            error!(target: "mcp_server", error = %e, "Failed to encode response");
            None
        }
    }
}
