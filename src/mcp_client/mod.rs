//! MCP Client: JSON-RPC 2.0 to Model Context Protocol servers.
//!
//! This module handles:
//! - Content-Length framing of JSON-RPC messages
//! - Spawning MCP server child processes (stdio) or POSTing to HTTP servers
//! - The initialize handshake and request/response correlation per server
//! - Tool discovery and aggregation across all servers
//! - Tool / resource / prompt routing
//! - Persisting the server registry as JSON or YAML

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{McpClient, ServerStatus, ServerStatusInfo};
pub use connection::ServerConnection;
pub use errors::McpError;
pub use registry::ToolRegistry;
pub use types::{Prompt, Resource, ServerConfig, Tool, ToolCallResult, TransportKind};
