//! Minimal MCP server over stdio, used by the integration tests.
//!
//! Behaviour is driven by environment variables:
//! - `ECHO_MCP_NAME`: server name, used in resource URIs and replies (default `echo`)
//! - `ECHO_MCP_TOOLS`: comma-separated tool names to advertise (default `echo`)
//! - `ECHO_MCP_REQUIRED`: field every tool's schema lists as required
//! - `ECHO_MCP_MODE`:
//!   - `no-header`: answer `tools/list` with a header block lacking Content-Length
//!   - `reject-init`: answer `initialize` with a JSON-RPC error
//!   - `chatty`: send a log notification before every response
//!
//! `tools/call` echoes `<server>:<tool>:<arguments JSON>`; a tool named `fail`
//! replies with `isError: true`, and one named `slow` answers after 300 ms.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncWriteExt, BufReader};

use mcp_hub::mcp_client::codec::{self, FrameError};

const SLOW_REPLY: Duration = Duration::from_millis(300);

struct Fixture {
    name: String,
    tools: Vec<String>,
    required: Option<String>,
    mode: String,
}

impl Fixture {
    fn from_env() -> Self {
        let tools = std::env::var("ECHO_MCP_TOOLS").unwrap_or_else(|_| "echo".into());
        Self {
            name: std::env::var("ECHO_MCP_NAME").unwrap_or_else(|_| "echo".into()),
            tools: tools
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            required: std::env::var("ECHO_MCP_REQUIRED").ok(),
            mode: std::env::var("ECHO_MCP_MODE").unwrap_or_default(),
        }
    }

    fn resource_uri(&self) -> String {
        format!("echo://{}/readme", self.name)
    }

    fn tool_list(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| {
                let mut schema = json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                });
                if let Some(field) = &self.required {
                    schema["required"] = json!([field]);
                }
                json!({
                    "name": tool,
                    "description": format!("{tool} from {}", self.name),
                    "inputSchema": schema
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Result or `(code, message)` for one request.
    fn handle(&self, method: &str, params: &Value) -> Result<Value, (i64, String)> {
        match method {
            "initialize" if self.mode == "reject-init" => {
                Err((-32600, "initialization refused".into()))
            }
            "initialize" => Ok(json!({
                "protocolVersion": params["protocolVersion"],
                "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                "serverInfo": { "name": self.name, "version": "0.0.1" }
            })),
            "tools/list" => Ok(self.tool_list()),
            "tools/call" => {
                let tool = params["name"].as_str().unwrap_or_default();
                let text = format!("{}:{tool}:{}", self.name, params["arguments"]);
                Ok(json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": tool == "fail"
                }))
            }
            "resources/list" => Ok(json!({
                "resources": [{
                    "uri": self.resource_uri(),
                    "name": "readme",
                    "mimeType": "text/plain"
                }]
            })),
            "resources/read" if params["uri"] == self.resource_uri() => Ok(json!({
                "contents": [{ "uri": self.resource_uri(), "text": format!("hello from {}", self.name) }]
            })),
            "resources/read" => Err((-32002, "resource not found".into())),
            "prompts/list" => Ok(json!({
                "prompts": [{
                    "name": "greet",
                    "description": "Say hello",
                    "arguments": [{ "name": "who", "required": true }]
                }]
            })),
            "prompts/get" if params["name"] == "greet" => {
                let who = params["arguments"]["who"].as_str().unwrap_or("world");
                Ok(json!({
                    "messages": [
                        { "role": "user", "content": { "type": "text", "text": format!("Hello, {who}!") } },
                        { "role": "assistant", "content": format!("from {}", self.name) }
                    ]
                }))
            }
            "prompts/get" => Err((-32602, "unknown prompt".into())),
            _ => Err((-32601, format!("method not found: {method}"))),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), FrameError> {
    let fixture = Fixture::from_env();
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();

    loop {
        let message = match codec::read_message(&mut reader).await {
            Ok(message) => message,
            Err(FrameError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let method = message["method"].as_str().unwrap_or_default();
        let Some(id) = message.get("id").filter(|id| !id.is_null()).cloned() else {
            continue;
        };

        if fixture.mode == "no-header" && method == "tools/list" {
            writer.write_all(b"X-Broken: yes\r\n\r\n").await?;
            writer.flush().await?;
            continue;
        }

        if method == "tools/call" && message["params"]["name"] == "slow" {
            tokio::time::sleep(SLOW_REPLY).await;
        }

        if fixture.mode == "chatty" {
            let note = json!({
                "jsonrpc": "2.0",
                "method": "notifications/message",
                "params": { "level": "info", "data": format!("handling {method}") }
            });
            codec::write_message(&mut writer, &note).await?;
        }

        let response = match fixture.handle(method, &message["params"]) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, text)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": code, "message": text }
            }),
        };
        codec::write_message(&mut writer, &response).await?;
    }
}
