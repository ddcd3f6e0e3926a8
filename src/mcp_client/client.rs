//! MCP Client: the multi-server orchestrator.
//!
//! Holds the ordered server registry, the live connections and the tool
//! cache. Calls are routed by tool / resource / prompt across servers, and
//! every lifecycle transition is reported to an optional status sink.
//!
//! Tools are served from the cache taken at connect time; resources and
//! prompts are queried live on every call.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::config;
use super::connection::ServerConnection;
use super::errors::McpError;
use super::registry::ToolRegistry;
use super::types::{Prompt, Resource, ServerConfig, Tool, ToolCallResult, TransportKind};

// ─── Status Reporting ────────────────────────────────────────────────────────

/// A server lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Connecting,
    Connected { tool_count: usize },
    Failed { reason: String },
    Disconnected,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Connecting => f.write_str("connecting"),
            ServerStatus::Connected { tool_count } => write!(f, "connected ({tool_count} tools)"),
            ServerStatus::Failed { reason } => write!(f, "failed to connect: {reason}"),
            ServerStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Receives `(server_name, status)` on every transition.
pub type StatusSink = Box<dyn Fn(&str, &ServerStatus) + Send + Sync>;

/// Snapshot of one configured server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusInfo {
    pub name: String,
    pub enabled: bool,
    pub connected: bool,
    pub tool_count: usize,
    pub transport: TransportKind,
    pub connected_at: Option<DateTime<Utc>>,
    /// `serverInfo` reported by the server during the handshake.
    pub server_info: Option<Value>,
}

// ─── McpClient ───────────────────────────────────────────────────────────────

/// High-level MCP client that manages multiple servers and routes calls.
#[derive(Default)]
pub struct McpClient {
    /// Server configurations, in registration order.
    configs: Vec<ServerConfig>,
    /// Live connections by server name.
    connections: HashMap<String, ServerConnection>,
    /// Tool snapshots of connected servers.
    registry: ToolRegistry,
    status_sink: Option<StatusSink>,
    request_timeout: Option<Duration>,
}

impl McpClient {
    /// Create a client with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client from configs; later duplicates of a name are dropped.
    pub fn from_configs(configs: Vec<ServerConfig>) -> Self {
        let mut client = Self::new();
        for config in configs {
            if let Err(e) = client.add_server(config) {
                tracing::warn!(error = %e, "ignoring server config");
            }
        }
        client
    }

    /// Install the status sink.
    pub fn set_status_sink<F>(&mut self, sink: F)
    where
        F: Fn(&str, &ServerStatus) + Send + Sync + 'static,
    {
        self.status_sink = Some(Box::new(sink));
    }

    /// Bound each request on connections made from now on.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.request_timeout = timeout;
    }

    fn emit(&self, server_name: &str, status: ServerStatus) {
        if let Some(sink) = &self.status_sink {
            sink(server_name, &status);
        }
    }

    fn config_mut(&mut self, name: &str) -> Result<&mut ServerConfig, McpError> {
        self.configs
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })
    }

    // ─── Registry ────────────────────────────────────────────────────────

    /// Register a server. Fails without mutating if the name is taken or the
    /// config is incomplete.
    pub fn add_server(&mut self, config: ServerConfig) -> Result<(), McpError> {
        if self.get_server_config(&config.name).is_some() {
            return Err(McpError::DuplicateServer { name: config.name });
        }
        config
            .validate()
            .map_err(|reason| McpError::ConfigError { reason })?;
        tracing::debug!(server = %config.name, transport = %config.transport, "server registered");
        self.configs.push(config);
        Ok(())
    }

    /// Disconnect (if live) and forget a server.
    pub fn remove_server(&mut self, name: &str) -> Result<(), McpError> {
        self.config_mut(name)?;
        self.disconnect_server(name);
        self.configs.retain(|c| c.name != name);
        Ok(())
    }

    pub fn enable_server(&mut self, name: &str) -> Result<(), McpError> {
        self.config_mut(name)?.enabled = true;
        Ok(())
    }

    /// Mark a server disabled, disconnecting it if live.
    pub fn disable_server(&mut self, name: &str) -> Result<(), McpError> {
        self.config_mut(name)?.enabled = false;
        self.disconnect_server(name);
        Ok(())
    }

    pub fn get_server_config(&self, name: &str) -> Option<&ServerConfig> {
        self.configs.iter().find(|c| c.name == name)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect every enabled server, in registry order.
    ///
    /// One server failing does not stop the others. Returns the failures;
    /// an empty list means every attempt succeeded.
    pub async fn connect_all(&mut self) -> Vec<(String, McpError)> {
        let enabled: Vec<String> = self
            .configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect();

        let mut errors = Vec::new();
        for name in enabled {
            if let Err(e) = self.connect_server(&name).await {
                errors.push((name, e));
            }
        }
        errors
    }

    /// Connect one server and snapshot its tools.
    ///
    /// Already connected is a no-op success.
    pub async fn connect_server(&mut self, name: &str) -> Result<(), McpError> {
        if self.connections.contains_key(name) {
            return Ok(());
        }
        let config = self
            .get_server_config(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer {
                name: name.to_string(),
            })?;

        self.emit(name, ServerStatus::Connecting);

        let mut connection = ServerConnection::new(config);
        connection.set_request_timeout(self.request_timeout);

        if let Err(e) = connection.connect().await {
            tracing::warn!(server = name, error = %e, "failed to connect");
            self.emit(name, ServerStatus::Failed { reason: e.detail() });
            return Err(e);
        }

        let tools = connection.list_tools().await;
        if !connection.is_connected() {
            let err = McpError::NotConnected {
                name: name.to_string(),
            };
            tracing::warn!(server = name, "connection dropped during tool discovery");
            self.emit(name, ServerStatus::Failed { reason: err.to_string() });
            return Err(err);
        }
        let tool_count = tools.len();
        self.registry.register_server_tools(name, tools);
        let order: Vec<String> = self.configs.iter().map(|c| c.name.clone()).collect();
        self.registry.order_servers(&order);
        self.connections.insert(name.to_string(), connection);

        tracing::info!(server = name, tool_count, "server ready");
        self.emit(name, ServerStatus::Connected { tool_count });
        Ok(())
    }

    /// Disconnect one server and drop its cached tools. No-op if not live.
    pub fn disconnect_server(&mut self, name: &str) {
        self.registry.unregister_server(name);
        if let Some(mut connection) = self.connections.remove(name) {
            connection.disconnect();
            self.emit(name, ServerStatus::Disconnected);
        }
    }

    /// Forget connections that dropped themselves (after a timeout).
    fn reap_dropped(&mut self) {
        let dropped: Vec<String> = self
            .connections
            .iter()
            .filter(|(_, c)| !c.is_connected())
            .map(|(name, _)| name.clone())
            .collect();
        for name in dropped {
            tracing::warn!(server = %name, "server connection lost");
            self.disconnect_server(&name);
        }
    }

    /// Disconnect every live server.
    pub fn disconnect_all(&mut self) {
        let live: Vec<String> = self
            .configs
            .iter()
            .map(|c| c.name.clone())
            .filter(|n| self.connections.contains_key(n))
            .collect();
        for name in live {
            self.disconnect_server(&name);
        }
        self.registry.clear();
    }

    /// Disconnect then connect again, refreshing the tool cache.
    pub async fn restart_server(&mut self, name: &str) -> Result<(), McpError> {
        if self.get_server_config(name).is_none() {
            return Err(McpError::UnknownServer {
                name: name.to_string(),
            });
        }
        self.disconnect_server(name);
        self.connect_server(name).await
    }

    // ─── Aggregation ─────────────────────────────────────────────────────

    /// Cached tools of every connected server. Stale until the next connect.
    pub fn all_tools(&self) -> Vec<&Tool> {
        self.registry.all_tools()
    }

    /// Resources of every connected server, queried live.
    pub async fn all_resources(&mut self) -> Vec<Resource> {
        let mut resources = Vec::new();
        for config in &self.configs {
            if let Some(connection) = self.connections.get_mut(&config.name) {
                resources.extend(connection.list_resources().await);
            }
        }
        self.reap_dropped();
        resources
    }

    /// Prompts of every connected server, queried live.
    pub async fn all_prompts(&mut self) -> Vec<Prompt> {
        let mut prompts = Vec::new();
        for config in &self.configs {
            if let Some(connection) = self.connections.get_mut(&config.name) {
                prompts.extend(connection.list_prompts().await);
            }
        }
        self.reap_dropped();
        prompts
    }

    // ─── Routing ─────────────────────────────────────────────────────────

    /// Execute a tool call, routing to the server that owns the tool.
    ///
    /// Accepts a raw tool name (first server in registry order wins a clash)
    /// or an exported `server__tool` name. Never fails; an unknown tool or
    /// missing required argument comes back as an `is_error` result.
    pub async fn call_tool(&mut self, tool_name: &str, arguments: Value) -> ToolCallResult {
        let Some(tool) = self.registry.resolve(tool_name) else {
            let err = McpError::ToolNotFound {
                name: tool_name.to_string(),
            };
            tracing::debug!(tool = tool_name, "tool not in cache");
            return ToolCallResult::failure(tool_name, None, err.to_string());
        };

        if let Err(e) = ToolRegistry::validate_tool_call(tool, &arguments) {
            return ToolCallResult::failure(&tool.name, Some(&tool.server_name), e.to_string());
        }

        let server_name = tool.server_name.clone();
        let raw_name = tool.name.clone();

        let Some(connection) = self.connections.get_mut(&server_name) else {
            let err = McpError::NotConnected { name: server_name };
            return ToolCallResult::failure(&raw_name, None, err.to_string());
        };

        tracing::debug!(server = %server_name, tool = %raw_name, "dispatching tool call");
        let result = connection.call_tool(&raw_name, arguments).await;
        self.reap_dropped();
        result
    }

    /// Read a resource from the first connected server that serves it.
    ///
    /// Servers are tried in registry order; an error or empty body moves on
    /// to the next one.
    pub async fn read_resource(&mut self, uri: &str) -> Result<String, McpError> {
        let found = self.find_resource(uri).await;
        self.reap_dropped();
        found
    }

    async fn find_resource(&mut self, uri: &str) -> Result<String, McpError> {
        for config in &self.configs {
            let Some(connection) = self.connections.get_mut(&config.name) else {
                continue;
            };
            match connection.read_resource(uri).await {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(server = %config.name, uri, error = %e, "resource not served");
                }
            }
        }
        Err(McpError::ResourceNotFound {
            uri: uri.to_string(),
        })
    }

    /// Render a prompt on the first connected server whose live listing
    /// contains `name`.
    pub async fn get_prompt(&mut self, name: &str, arguments: Value) -> Result<String, McpError> {
        let rendered = self.render_prompt(name, arguments).await;
        self.reap_dropped();
        rendered
    }

    async fn render_prompt(&mut self, name: &str, arguments: Value) -> Result<String, McpError> {
        for config in &self.configs {
            let Some(connection) = self.connections.get_mut(&config.name) else {
                continue;
            };
            let prompts = connection.list_prompts().await;
            if prompts.iter().any(|p| p.name == name) {
                return connection.get_prompt(name, arguments).await;
            }
        }
        Err(McpError::PromptNotFound {
            name: name.to_string(),
        })
    }

    /// One OpenAI function-calling descriptor per cached tool.
    pub fn generate_tool_definitions(&self) -> Vec<Value> {
        self.registry.to_openai_tools()
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    /// Replace the registry with the servers in `path`.
    ///
    /// Live servers are disconnected first. On error nothing changes.
    pub fn load_config(&mut self, path: &Path) -> Result<usize, McpError> {
        let configs = config::load_file(path)?;
        self.disconnect_all();
        self.configs = configs;
        tracing::info!(
            path = %path.display(),
            server_count = self.configs.len(),
            servers = ?self.configured_servers(),
            "loaded MCP server config"
        );
        Ok(self.configs.len())
    }

    /// Write the registry to `path`.
    pub fn save_config(&self, path: &Path) -> Result<(), McpError> {
        config::save_file(path, &self.configs)?;
        tracing::debug!(path = %path.display(), "saved MCP server config");
        Ok(())
    }

    // ─── Status ──────────────────────────────────────────────────────────

    pub fn is_server_connected(&self, name: &str) -> bool {
        self.connections
            .get(name)
            .is_some_and(ServerConnection::is_connected)
    }

    /// Names of all configured servers, in registry order.
    pub fn configured_servers(&self) -> Vec<&str> {
        self.configs.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of connected servers, in registry order.
    pub fn connected_servers(&self) -> Vec<&str> {
        self.configs
            .iter()
            .filter(|c| self.connections.contains_key(&c.name))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Number of cached tools.
    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    /// Status of every configured server, in registry order.
    pub fn server_statuses(&self) -> Vec<ServerStatusInfo> {
        self.configs
            .iter()
            .map(|c| {
                let connection = self.connections.get(&c.name);
                ServerStatusInfo {
                    name: c.name.clone(),
                    enabled: c.enabled,
                    connected: connection.is_some_and(ServerConnection::is_connected),
                    tool_count: self.registry.tools_for_server(&c.name).len(),
                    transport: c.transport,
                    connected_at: connection.and_then(ServerConnection::connected_at),
                    server_info: connection.and_then(|conn| conn.server_info().cloned()),
                }
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn stdio(name: &str) -> ServerConfig {
        ServerConfig::stdio(name, "npx", &[])
    }

    #[test]
    fn test_new_client_empty() {
        let client = McpClient::new();
        assert!(client.configured_servers().is_empty());
        assert_eq!(client.tool_count(), 0);
        assert!(client.all_tools().is_empty());
        assert!(client.generate_tool_definitions().is_empty());
    }

    #[test]
    fn test_add_duplicate_rejected() {
        let mut client = McpClient::new();
        client.add_server(stdio("fs")).unwrap();

        let mut other = stdio("fs");
        other.command = "different".into();
        let err = client.add_server(other).unwrap_err();
        assert!(matches!(err, McpError::DuplicateServer { .. }));
        assert_eq!(client.configured_servers(), vec!["fs"]);
        assert_eq!(client.get_server_config("fs").unwrap().command, "npx");
    }

    #[test]
    fn test_add_invalid_rejected() {
        let mut client = McpClient::new();
        assert!(client.add_server(ServerConfig::stdio("empty", "", &[])).is_err());
        assert!(client.configured_servers().is_empty());
    }

    #[test]
    fn test_registry_order_is_registration_order() {
        let client = McpClient::from_configs(vec![stdio("zeta"), stdio("alpha"), stdio("zeta")]);
        assert_eq!(client.configured_servers(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_enable_disable_toggle() {
        let mut client = McpClient::from_configs(vec![stdio("fs")]);
        client.disable_server("fs").unwrap();
        assert!(!client.get_server_config("fs").unwrap().enabled);
        client.enable_server("fs").unwrap();
        assert!(client.get_server_config("fs").unwrap().enabled);
        assert!(client.disable_server("ghost").is_err());
    }

    #[test]
    fn test_remove_server() {
        let mut client = McpClient::from_configs(vec![stdio("fs"), stdio("web")]);
        client.remove_server("fs").unwrap();
        assert_eq!(client.configured_servers(), vec!["web"]);
        assert!(matches!(
            client.remove_server("fs"),
            Err(McpError::UnknownServer { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let mut client = McpClient::new();
        let result = client.call_tool("nonexistent", json!({})).await;
        assert!(result.is_error);
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_connect_unknown_server() {
        let mut client = McpClient::new();
        let err = client.connect_server("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::UnknownServer { .. }));
    }

    #[tokio::test]
    async fn test_failed_connect_reports_status() {
        let events: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink_events = Arc::clone(&events);

        let mut client = McpClient::from_configs(vec![
            ServerConfig::stdio("broken", "/nonexistent/mcp-server", &[]),
        ]);
        client.set_status_sink(move |name, status| {
            sink_events.lock().unwrap().push(format!("{name}: {status}"));
        });

        let failures = client.connect_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        assert!(!client.is_server_connected("broken"));

        let events = events.lock().unwrap();
        assert_eq!(events[0], "broken: connecting");
        assert!(events[1].starts_with("broken: failed to connect"));
    }

    #[tokio::test]
    async fn test_connect_all_skips_disabled() {
        let mut disabled = ServerConfig::stdio("off", "/nonexistent/mcp-server", &[]);
        disabled.enabled = false;
        let mut client = McpClient::from_configs(vec![disabled]);
        assert!(client.connect_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_http_server_connects_without_io() {
        let mut client =
            McpClient::from_configs(vec![ServerConfig::http("remote", "http://127.0.0.1:1/mcp")]);
        client.connect_server("remote").await.unwrap();
        assert!(client.is_server_connected("remote"));
        // The listing fails against a closed port; the cache is just empty.
        assert_eq!(client.tool_count(), 0);
        assert_eq!(client.connected_servers(), vec!["remote"]);

        client.disconnect_server("remote");
        assert!(!client.is_server_connected("remote"));
    }

    #[tokio::test]
    async fn test_routing_without_connections() {
        let mut client = McpClient::from_configs(vec![stdio("fs")]);
        assert!(client.all_resources().await.is_empty());
        assert!(client.all_prompts().await.is_empty());
        assert!(matches!(
            client.read_resource("file:///x").await,
            Err(McpError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            client.get_prompt("greet", json!({})).await,
            Err(McpError::PromptNotFound { .. })
        ));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ServerStatus::Connecting.to_string(), "connecting");
        assert_eq!(
            ServerStatus::Connected { tool_count: 3 }.to_string(),
            "connected (3 tools)"
        );
        assert_eq!(ServerStatus::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_server_statuses() {
        let mut off = stdio("off");
        off.enabled = false;
        let client = McpClient::from_configs(vec![stdio("fs"), off]);
        let statuses = client.server_statuses();
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].enabled);
        assert!(!statuses[1].enabled);
        assert!(statuses.iter().all(|s| !s.connected && s.tool_count == 0));
        assert!(statuses.iter().all(|s| s.server_info.is_none()));
    }
}
