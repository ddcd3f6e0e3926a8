//! The per-server tool cache.
//!
//! Provides:
//! - Wholesale replacement of a server's tool snapshot at (re)connect time
//! - Deterministic lookup: first server in registry order wins a name clash
//! - Namespaced names (`server__tool`) for the LLM-facing export
//! - A required-field check against a tool's input schema
//! - Serialization into the OpenAI function-calling format

use serde_json::{json, Value};

use super::errors::McpError;
use super::types::Tool;

/// Separator between server and tool in exported tool names.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Build the exported name for a tool.
pub fn namespaced_name(server_name: &str, tool_name: &str) -> String {
    format!("{server_name}{NAMESPACE_SEPARATOR}{tool_name}")
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Cached tool lists, one entry per connected server, in registry order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    servers: Vec<(String, Vec<Tool>)>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything cached for `server_name` with `tools`.
    ///
    /// A new server is appended; call [`order_servers`](Self::order_servers)
    /// to restore registry order.
    pub fn register_server_tools(&mut self, server_name: &str, tools: Vec<Tool>) {
        match self.servers.iter_mut().find(|(name, _)| name == server_name) {
            Some((_, cached)) => *cached = tools,
            None => self.servers.push((server_name.to_string(), tools)),
        }
    }

    /// Remove all tools belonging to a server.
    pub fn unregister_server(&mut self, server_name: &str) {
        self.servers.retain(|(name, _)| name != server_name);
    }

    /// Arrange cached servers to follow `order`; unknown names go last.
    pub fn order_servers<S: AsRef<str>>(&mut self, order: &[S]) {
        let rank = |name: &str| {
            order
                .iter()
                .position(|o| o.as_ref() == name)
                .unwrap_or(usize::MAX)
        };
        self.servers.sort_by_key(|(name, _)| rank(name));
    }

    /// Every cached tool, server by server.
    pub fn all_tools(&self) -> Vec<&Tool> {
        self.servers.iter().flat_map(|(_, tools)| tools.iter()).collect()
    }

    /// Cached tools of one server (empty if none).
    pub fn tools_for_server(&self, server_name: &str) -> &[Tool] {
        self.servers
            .iter()
            .find(|(name, _)| name == server_name)
            .map(|(_, tools)| tools.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve a tool by name.
    ///
    /// A raw tool name matches the first server (in registry order) that
    /// advertises it. Failing that, a `server__tool` name is tried.
    pub fn resolve(&self, name: &str) -> Option<&Tool> {
        if let Some(tool) = self.all_tools().into_iter().find(|t| t.name == name) {
            return Some(tool);
        }

        self.servers.iter().find_map(|(server, tools)| {
            let raw = name
                .strip_prefix(server.as_str())?
                .strip_prefix(NAMESPACE_SEPARATOR)?;
            tools.iter().find(|t| t.name == raw)
        })
    }

    /// Number of cached tools.
    pub fn len(&self) -> usize {
        self.servers.iter().map(|(_, tools)| tools.len()).sum()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.servers.clear();
    }

    /// Check that `arguments` carries every field the tool's schema requires.
    ///
    /// This is a structural pre-check only; full JSON Schema validation is
    /// left to the server.
    pub fn validate_tool_call(tool: &Tool, arguments: &Value) -> Result<(), McpError> {
        let Some(required) = tool.input_schema.get("required").and_then(Value::as_array) else {
            return Ok(());
        };

        let args = arguments.as_object();
        for field in required.iter().filter_map(Value::as_str) {
            if !args.is_some_and(|obj| obj.contains_key(field)) {
                return Err(McpError::InvalidArguments {
                    tool: tool.name.clone(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }
        Ok(())
    }

    /// Serialize all cached tools into OpenAI function-calling format.
    ///
    /// Names are namespaced (`server__tool`) and descriptions prefixed with
    /// `[MCP:server] `; the input schema passes through unchanged.
    pub fn to_openai_tools(&self) -> Vec<Value> {
        self.all_tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": namespaced_name(&tool.server_name, &tool.name),
                        "description": format!("[MCP:{}] {}", tool.server_name, tool.description),
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server: &str, name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object"}),
            server_name: server.to_string(),
        }
    }

    #[test]
    fn test_register_replaces_wholesale() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("fs", vec![tool("fs", "read"), tool("fs", "write")]);
        assert_eq!(reg.len(), 2);

        reg.register_server_tools("fs", vec![tool("fs", "list")]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.tools_for_server("fs")[0].name, "list");
    }

    #[test]
    fn test_unregister_server() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("fs", vec![tool("fs", "read")]);
        reg.register_server_tools("web", vec![tool("web", "fetch")]);
        reg.unregister_server("fs");
        assert!(reg.tools_for_server("fs").is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_name_clash_follows_order() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("beta", vec![tool("beta", "search")]);
        reg.register_server_tools("alpha", vec![tool("alpha", "search")]);
        assert_eq!(reg.resolve("search").unwrap().server_name, "beta");

        reg.order_servers(&["alpha", "beta"]);
        let owners: Vec<&str> = reg.all_tools().iter().map(|t| t.server_name.as_str()).collect();
        assert_eq!(owners, vec!["alpha", "beta"]);
        for _ in 0..3 {
            assert_eq!(reg.resolve("search").unwrap().server_name, "alpha");
        }
    }

    #[test]
    fn test_resolve_namespaced() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("alpha", vec![tool("alpha", "search")]);
        reg.register_server_tools("beta", vec![tool("beta", "search")]);

        assert_eq!(reg.resolve("beta__search").unwrap().server_name, "beta");
        assert!(reg.resolve("gamma__search").is_none());
        assert!(reg.resolve("nothing").is_none());
    }

    #[test]
    fn test_resolve_namespaced_server_with_separator() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("my__srv", vec![tool("my__srv", "x")]);
        assert_eq!(reg.resolve("my__srv__x").unwrap().server_name, "my__srv");
    }

    #[test]
    fn test_validate_required_fields() {
        let mut t = tool("fs", "write");
        t.input_schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"]
        });

        assert!(ToolRegistry::validate_tool_call(&t, &json!({"path": "/tmp/a"})).is_ok());
        let err = ToolRegistry::validate_tool_call(&t, &json!({})).unwrap_err();
        assert!(err.to_string().contains("path"));
        assert!(ToolRegistry::validate_tool_call(&t, &Value::Null).is_err());
    }

    #[test]
    fn test_validate_without_schema() {
        let mut t = tool("fs", "ping");
        t.input_schema = Value::Null;
        assert!(ToolRegistry::validate_tool_call(&t, &json!({})).is_ok());
    }

    #[test]
    fn test_openai_export() {
        let mut reg = ToolRegistry::new();
        reg.register_server_tools("fs", vec![tool("fs", "read")]);
        let defs = reg.to_openai_tools();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "fs__read");
        assert_eq!(defs[0]["function"]["description"], "[MCP:fs] read tool");
        assert_eq!(defs[0]["function"]["parameters"], json!({"type": "object"}));
    }

    #[test]
    fn test_empty_registry() {
        let reg = ToolRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.to_openai_tools().is_empty());
    }
}
