//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, the capability snapshots a server advertises
//! (tools, resources, prompts) and the per-server configuration record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    ///
    /// Empty params (`null`, `{}`, `[]`) are dropped so the field is omitted
    /// on the wire.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params: params.filter(|p| !is_empty_value(p)),
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: params.filter(|p| !is_empty_value(p)),
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Whether the response's id refers to the request with `expected` id.
    ///
    /// Servers echo ids back as numbers; a decimal string is tolerated.
    pub fn matches_id(&self, expected: u64) -> bool {
        self.numeric_id() == Some(expected)
    }

    /// The response id as an integer, if it is one.
    pub fn numeric_id(&self) -> Option<u64> {
        match &self.id {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse::<u64>().ok(),
            _ => None,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

// ─── MCP Capability Snapshots ────────────────────────────────────────────────

/// A tool advertised by a server's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
    /// Owning server, stamped at discovery time.
    #[serde(default)]
    pub server_name: String,
}

/// A resource advertised by a server's `resources/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub server_name: String,
}

/// A prompt advertised by a server's `prompts/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Argument specs, kept opaque.
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub server_name: String,
}

/// Result of a tool call execution.
///
/// `success == !is_error`. `content` is the in-order concatenation of every
/// text block the server returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub tool_name: String,
    /// Server that handled the call; `None` when routing failed.
    pub server_name: Option<String>,
    pub success: bool,
    pub is_error: bool,
    pub content: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    /// A failed call that never produced server output.
    pub fn failure(tool_name: &str, server_name: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            server_name: server_name.map(str::to_string),
            success: false,
            is_error: true,
            content: String::new(),
            error: Some(error.into()),
            execution_time_ms: 0,
        }
    }
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// How bytes reach a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Spawned child process, framed JSON-RPC over its stdin/stdout.
    #[default]
    Stdio,
    /// Each request is an independent HTTP POST to `url`.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stdio => f.write_str("stdio"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

/// A registered server. `name` is the registry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub enabled: bool,
    pub transport: TransportKind,
    /// Endpoint for `TransportKind::Http`; ignored for stdio.
    pub url: Option<String>,
}

impl ServerConfig {
    /// An enabled stdio server.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            enabled: true,
            transport: TransportKind::Stdio,
            url: None,
        }
    }

    /// An enabled HTTP server.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            enabled: true,
            transport: TransportKind::Http,
            url: Some(url.to_string()),
        }
    }

    /// Add an environment variable for the child process.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Check the fields the selected transport needs.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("server name must not be empty".into());
        }
        match self.transport {
            TransportKind::Stdio if self.command.trim().is_empty() => {
                Err(format!("server '{}': stdio transport requires a command", self.name))
            }
            TransportKind::Http if self.url.as_deref().map_or(true, |u| u.trim().is_empty()) => {
                Err(format!("server '{}': http transport requires a url", self.name))
            }
            _ => Ok(()),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
