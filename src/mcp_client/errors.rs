//! MCP client error types.

use thiserror::Error;

use super::codec::FrameError;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// A server process (or its pipes) could not be created.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed or was rejected.
    #[error("server '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// I/O failure on the server's channel (closed pipe, HTTP failure).
    #[error("transport error for server '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Framing or message-shape violation (missing header, bad JSON, id mismatch).
    #[error("protocol error for server '{server}': {reason}")]
    ProtocolError { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A request was issued on a connection that is not connected.
    #[error("server '{name}' is not connected")]
    NotConnected { name: String },

    /// No server with this name is registered.
    #[error("unknown server: '{name}'")]
    UnknownServer { name: String },

    /// A server with this name is already registered.
    #[error("server '{name}' is already registered")]
    DuplicateServer { name: String },

    /// No connected server exposes this tool.
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// No connected server could serve this resource.
    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    /// No connected server exposes this prompt.
    #[error("Prompt not found: {name}")]
    PromptNotFound { name: String },

    /// `resources/read` failed on a specific server.
    #[error("Error reading resource: {reason}")]
    ResourceReadFailed { uri: String, reason: String },

    /// `prompts/get` failed on a specific server.
    #[error("Error getting prompt: {reason}")]
    PromptFailed { name: String, reason: String },

    /// Tool call arguments failed the required-field check.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A request exceeded the configured timeout.
    #[error("request '{method}' to server '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    /// Configuration error (bad file, invalid server entry).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl McpError {
    /// Attribute a codec failure to a server.
    ///
    /// End-of-stream and I/O failures are transport errors; everything else
    /// the codec rejects is a protocol error.
    pub fn from_frame(server: &str, err: FrameError) -> Self {
        match err {
            FrameError::Io(_) | FrameError::Closed => McpError::TransportError {
                server: server.to_string(),
                reason: err.to_string(),
            },
            _ => McpError::ProtocolError {
                server: server.to_string(),
                reason: err.to_string(),
            },
        }
    }

    /// Human-readable message without the variant prefix, for result payloads.
    pub fn detail(&self) -> String {
        match self {
            McpError::ServerError { code, message, .. } => format!("[{code}] {message}"),
            McpError::InitFailed { reason, .. }
            | McpError::ResourceReadFailed { reason, .. }
            | McpError::PromptFailed { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_closed_is_transport_error() {
        let err = McpError::from_frame("fs", FrameError::Closed);
        assert!(matches!(err, McpError::TransportError { ref server, .. } if server == "fs"));
    }

    #[test]
    fn test_frame_missing_header_is_protocol_error() {
        let err = McpError::from_frame("fs", FrameError::MissingContentLength);
        assert!(matches!(err, McpError::ProtocolError { .. }));
        assert!(err.to_string().contains("Content-Length"));
    }

    #[test]
    fn test_read_and_prompt_failures_keep_prefix() {
        let read = McpError::ResourceReadFailed {
            uri: "file:///a".into(),
            reason: "boom".into(),
        };
        assert_eq!(read.to_string(), "Error reading resource: boom");
        assert_eq!(read.detail(), "boom");

        let prompt = McpError::PromptFailed {
            name: "greet".into(),
            reason: "nope".into(),
        };
        assert!(prompt.to_string().starts_with("Error getting prompt: "));
    }

    #[test]
    fn test_server_error_detail() {
        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.detail(), "[-32601] Method not found");
    }

    #[test]
    fn test_not_found_messages() {
        let err = McpError::ToolNotFound { name: "search".into() };
        assert_eq!(err.to_string(), "Tool not found: search");
        let err = McpError::ResourceNotFound { uri: "x://y".into() };
        assert!(err.to_string().starts_with("Resource not found"));
    }
}
