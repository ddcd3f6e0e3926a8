//! A live connection to one MCP server.
//!
//! Owns the transport, the request-id counter and the connected flag. Every
//! exchange is a strict send-then-receive round trip; methods take `&mut self`
//! so at most one request is ever in flight.
//!
//! Discovery and invocation never fail outward: discovery degrades to an
//! empty list, `call_tool` to an error-flagged [`ToolCallResult`].

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use super::errors::McpError;
use super::transport::Transport;
use super::types::{
    JsonRpcNotification, JsonRpcRequest, Prompt, Resource, ServerConfig, Tool, ToolCallResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client identity sent in `initialize`.
pub const CLIENT_NAME: &str = "mcp-hub";

// ─── ServerConnection ────────────────────────────────────────────────────────

pub struct ServerConnection {
    config: ServerConfig,
    transport: Option<Transport>,
    next_id: u64,
    connected: bool,
    connected_at: Option<DateTime<Utc>>,
    request_timeout: Option<Duration>,
    server_info: Option<Value>,
}

impl ServerConnection {
    /// A disconnected connection for `config`.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            transport: None,
            next_id: 0,
            connected: false,
            connected_at: None,
            request_timeout: None,
            server_info: None,
        }
    }

    /// Connection over an already-open transport (skips spawning).
    pub fn with_transport(config: ServerConfig, transport: Transport) -> Self {
        let mut conn = Self::new(config);
        conn.transport = Some(transport);
        conn
    }

    /// Bound every request by `timeout`. `None` waits indefinitely.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    /// `serverInfo` from the initialize result, if the server sent one.
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Open the transport and, for stdio servers, run the handshake.
    ///
    /// On failure the transport is torn down before returning.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        if self.connected {
            return Ok(());
        }

        if self.transport.is_none() {
            self.transport = Some(Transport::open(&self.config)?);
        }

        let needs_handshake = self
            .transport
            .as_ref()
            .is_some_and(Transport::needs_handshake);

        if needs_handshake {
            if let Err(e) = self.handshake().await {
                tracing::warn!(server = %self.config.name, error = %e, "handshake failed");
                self.disconnect();
                return Err(McpError::InitFailed {
                    name: self.config.name.clone(),
                    reason: e.detail(),
                });
            }
        }

        self.connected = true;
        self.connected_at = Some(Utc::now());
        tracing::info!(
            server = %self.config.name,
            transport = %self.config.transport,
            "server connected"
        );
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {}
            },
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.send_request("initialize", Some(params)).await?;
        self.server_info = result.get("serverInfo").cloned();
        self.send_notification("notifications/initialized").await
    }

    /// Close the transport and mark the connection disconnected.
    ///
    /// For stdio servers this does not wait for the process to exit.
    pub fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if self.connected {
            tracing::info!(server = %self.config.name, "server disconnected");
        }
        self.connected = false;
        self.connected_at = None;
    }

    // ─── Request / Response ──────────────────────────────────────────────

    /// Allocate the next request id. Ids start at 0 and are never reused.
    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send one request and wait for its response.
    ///
    /// A JSON-RPC `error` comes back as [`McpError::ServerError`]; a response
    /// without `result` yields an empty object.
    pub async fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let id = self.allocate_id();
        let request = JsonRpcRequest::new(id, method, params);
        let server = self.config.name.clone();
        let timeout = self.request_timeout;

        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| McpError::NotConnected { name: server.clone() })?;

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, transport.request(&request))
                .await
                .map_err(|_| limit),
            None => Ok(transport.request(&request).await),
        };

        // An abandoned request may leave its reply, or half a frame, in the
        // pipe; the channel cannot be trusted afterwards.
        let response = match outcome {
            Ok(response) => response?,
            Err(limit) => {
                tracing::warn!(server = %server, method, id, "request timed out, dropping connection");
                self.disconnect();
                return Err(McpError::Timeout {
                    server,
                    method: method.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(McpError::ServerError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or_else(|| Value::Object(Map::new())))
    }

    /// Send a notification without waiting for anything back.
    pub async fn send_notification(&mut self, method: &str) -> Result<(), McpError> {
        let transport = self.transport.as_mut().ok_or_else(|| McpError::NotConnected {
            name: self.config.name.clone(),
        })?;
        transport.notify(&JsonRpcNotification::new(method, None)).await
    }

    // ─── Capability Discovery ────────────────────────────────────────────

    pub async fn list_tools(&mut self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.list_capability("tools/list", "tools").await;
        for tool in &mut tools {
            tool.server_name = self.config.name.clone();
        }
        tools
    }

    pub async fn list_resources(&mut self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self.list_capability("resources/list", "resources").await;
        for resource in &mut resources {
            resource.server_name = self.config.name.clone();
        }
        resources
    }

    pub async fn list_prompts(&mut self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self.list_capability("prompts/list", "prompts").await;
        for prompt in &mut prompts {
            prompt.server_name = self.config.name.clone();
        }
        prompts
    }

    /// Issue a list request and pull items out of `result[field]`.
    ///
    /// A missing or non-array field means "none". Items that don't parse are
    /// skipped. Any failure is logged and yields an empty list.
    async fn list_capability<T: DeserializeOwned>(&mut self, method: &str, field: &str) -> Vec<T> {
        let result = match self.send_request(method, None).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(server = %self.config.name, method, error = %e, "capability listing failed");
                return Vec::new();
            }
        };

        let Some(items) = result.get(field).and_then(Value::as_array) else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    tracing::debug!(server = %self.config.name, method, error = %e, "skipping malformed entry");
                    None
                }
            })
            .collect()
    }

    // ─── Invocation ──────────────────────────────────────────────────────

    /// Call a tool. Never fails; problems surface as `is_error`.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> ToolCallResult {
        let start = Instant::now();
        let params = json!({ "name": name, "arguments": arguments });

        let mut result = match self.send_request("tools/call", Some(params)).await {
            Ok(value) => {
                let is_error = value.get("isError").and_then(Value::as_bool).unwrap_or(false);
                let content = join_text_blocks(value.get("content"), "type", "");
                ToolCallResult {
                    tool_name: name.to_string(),
                    server_name: Some(self.config.name.clone()),
                    success: !is_error,
                    is_error,
                    error: is_error.then(|| content.clone()),
                    content,
                    execution_time_ms: 0,
                }
            }
            Err(e) => {
                tracing::warn!(server = %self.config.name, tool = name, error = %e, "tool call failed");
                ToolCallResult::failure(name, Some(&self.config.name), e.detail())
            }
        };
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Read a resource; the text of every `contents[]` entry, concatenated.
    pub async fn read_resource(&mut self, uri: &str) -> Result<String, McpError> {
        let value = self
            .send_request("resources/read", Some(json!({ "uri": uri })))
            .await
            .map_err(|e| McpError::ResourceReadFailed {
                uri: uri.to_string(),
                reason: e.detail(),
            })?;
        Ok(join_text_blocks(value.get("contents"), "", ""))
    }

    /// Render a prompt; message texts joined with newlines.
    pub async fn get_prompt(&mut self, name: &str, arguments: Value) -> Result<String, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let value = self
            .send_request("prompts/get", Some(params))
            .await
            .map_err(|e| McpError::PromptFailed {
                name: name.to_string(),
                reason: e.detail(),
            })?;

        let lines: Vec<&str> = value
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| match m.get("content") {
                        Some(Value::String(text)) => Some(text.as_str()),
                        Some(Value::Object(obj)) => obj.get("text").and_then(Value::as_str),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(lines.join("\n"))
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Concatenate the `text` fields of an array of blocks.
///
/// With a non-empty `type_key`, only blocks whose `type_key` is `"text"`
/// contribute.
fn join_text_blocks(blocks: Option<&Value>, type_key: &str, separator: &str) -> String {
    let Some(blocks) = blocks.and_then(Value::as_array) else {
        return String::new();
    };
    blocks
        .iter()
        .filter(|b| type_key.is_empty() || b.get(type_key).and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(separator)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
