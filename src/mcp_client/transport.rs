//! Byte channels to a single MCP server.
//!
//! - [`StdioTransport`]: Content-Length framed JSON-RPC over a child
//!   process's stdin/stdout (or any pair of async streams).
//! - [`HttpTransport`]: every request is an independent HTTP POST; there is no
//!   session to open or close.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use super::codec;
use super::errors::McpError;
use super::lifecycle::ChildProcess;
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerConfig, TransportKind};

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// The channel a `ServerConnection` talks through.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

impl Transport {
    /// Establish the channel selected by `config.transport`.
    ///
    /// For stdio this spawns the server; for HTTP it performs no I/O.
    pub fn open(config: &ServerConfig) -> Result<Self, McpError> {
        match config.transport {
            TransportKind::Stdio => Ok(Transport::Stdio(StdioTransport::spawn(config)?)),
            TransportKind::Http => Ok(Transport::Http(HttpTransport::new(config)?)),
        }
    }

    /// Send one request and return the matching response.
    pub async fn request(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        match self {
            Transport::Stdio(t) => t.request(req).await,
            Transport::Http(t) => t.request(req).await,
        }
    }

    /// Send a notification; nothing is read back.
    pub async fn notify(&mut self, note: &JsonRpcNotification) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.notify(note).await,
            Transport::Http(t) => t.notify(note).await,
        }
    }

    /// Whether this transport needs the initialize handshake.
    pub fn needs_handshake(&self) -> bool {
        matches!(self, Transport::Stdio(_))
    }

    /// Release the channel.
    pub fn close(self) {
        match self {
            Transport::Stdio(t) => t.close(),
            Transport::Http(_) => {}
        }
    }
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

/// Framed JSON-RPC over a pair of pipes.
pub struct StdioTransport {
    server_name: String,
    writer: BoxedWriter,
    reader: BufReader<BoxedReader>,
    process: Option<ChildProcess>,
}

impl StdioTransport {
    /// Spawn the server process and take ownership of its pipes.
    pub fn spawn(config: &ServerConfig) -> Result<Self, McpError> {
        let (process, (stdin, stdout)) = ChildProcess::spawn(config)?;
        let mut transport = Self::from_streams(&config.name, stdout, stdin);
        transport.process = Some(process);
        Ok(transport)
    }

    /// Wrap an existing stream pair (no owned process).
    pub fn from_streams<R, W>(server_name: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Box::new(writer),
            reader: BufReader::new(Box::new(reader) as BoxedReader),
            process: None,
        }
    }

    /// Write a request, then read messages until its response arrives.
    ///
    /// Server-initiated messages without an `id` are skipped, as are late
    /// responses to earlier requests. A response for any other id is a
    /// protocol error: only one request is ever in flight.
    pub async fn request(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        codec::write_message(&mut self.writer, req)
            .await
            .map_err(|e| McpError::from_frame(&self.server_name, e))?;
        tracing::trace!(server = %self.server_name, id = req.id, method = %req.method, "request sent");

        loop {
            let message = codec::read_message(&mut self.reader)
                .await
                .map_err(|e| McpError::from_frame(&self.server_name, e))?;

            if message.get("id").map_or(true, Value::is_null) {
                let method = message.get("method").and_then(Value::as_str).unwrap_or("");
                tracing::debug!(
                    server = %self.server_name,
                    method,
                    "skipping server-initiated message"
                );
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(message).map_err(|e| McpError::ProtocolError {
                    server: self.server_name.clone(),
                    reason: format!("malformed response: {e}"),
                })?;

            if let Some(stale) = response.numeric_id().filter(|id| *id < req.id) {
                tracing::debug!(
                    server = %self.server_name,
                    stale,
                    expected = req.id,
                    "skipping response to an abandoned request"
                );
                continue;
            }

            if !response.matches_id(req.id) {
                return Err(McpError::ProtocolError {
                    server: self.server_name.clone(),
                    reason: format!(
                        "response id {} does not match request id {}",
                        response.id.as_ref().map(Value::to_string).unwrap_or_default(),
                        req.id
                    ),
                });
            }
            return Ok(response);
        }
    }

    /// Write a notification.
    pub async fn notify(&mut self, note: &JsonRpcNotification) -> Result<(), McpError> {
        codec::write_message(&mut self.writer, note)
            .await
            .map_err(|e| McpError::from_frame(&self.server_name, e))
    }

    /// Close both pipe ends, then ask the process to exit.
    pub fn close(self) {
        let Self {
            server_name,
            writer,
            reader,
            process,
        } = self;
        drop(writer);
        drop(reader);
        if let Some(process) = process {
            tracing::debug!(server = %server_name, pid = ?process.id(), "terminating server");
            process.terminate();
        }
    }
}

// ─── HttpTransport ───────────────────────────────────────────────────────────

/// Per-call JSON-RPC over HTTP POST.
pub struct HttpTransport {
    server_name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> Result<Self, McpError> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| McpError::SpawnFailed {
                name: config.name.clone(),
                reason: "http transport requires a url".into(),
            })?;
        Ok(Self {
            server_name: config.name.clone(),
            url,
            client: reqwest::Client::new(),
        })
    }

    pub async fn request(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let body = self.post(req).await?;
        let response: JsonRpcResponse =
            serde_json::from_slice(&body).map_err(|e| McpError::ProtocolError {
                server: self.server_name.clone(),
                reason: format!("malformed response: {e}"),
            })?;
        if !response.matches_id(req.id) {
            return Err(McpError::ProtocolError {
                server: self.server_name.clone(),
                reason: format!("response id does not match request id {}", req.id),
            });
        }
        Ok(response)
    }

    pub async fn notify(&mut self, note: &JsonRpcNotification) -> Result<(), McpError> {
        self.post(note).await.map(|_| ())
    }

    async fn post<T: serde::Serialize>(&self, message: &T) -> Result<Vec<u8>, McpError> {
        let transport_err = |reason: String| McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        };

        let resp = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| transport_err(format!("POST {} failed: {e}", self.url)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(transport_err(format!("HTTP {status} from {}", self.url)));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| transport_err(format!("failed to read response body: {e}")))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    /// Transport wired to an in-memory peer; returns the peer's ends.
    fn paired() -> (StdioTransport, tokio::io::DuplexStream, tokio::io::DuplexStream) {
        let (client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        (
            StdioTransport::from_streams("mem", client_in, client_out),
            server_in,
            server_out,
        )
    }

    #[tokio::test]
    async fn test_request_reads_matching_response() {
        let (mut transport, mut server_in, mut server_out) = paired();

        let peer = tokio::spawn(async move {
            let req = codec::read_message(&mut server_in).await.unwrap();
            assert_eq!(req["method"], "ping");
            codec::write_message(
                &mut server_out,
                &json!({"jsonrpc": "2.0", "id": req["id"], "result": {"pong": true}}),
            )
            .await
            .unwrap();
        });

        let resp = transport
            .request(&JsonRpcRequest::new(0, "ping", None))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!({"pong": true})));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_notifications_are_skipped() {
        let (mut transport, mut server_in, mut server_out) = paired();

        tokio::spawn(async move {
            let req = codec::read_message(&mut server_in).await.unwrap();
            codec::write_message(
                &mut server_out,
                &json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
            )
            .await
            .unwrap();
            codec::write_message(
                &mut server_out,
                &json!({"jsonrpc": "2.0", "id": req["id"], "result": {}}),
            )
            .await
            .unwrap();
        });

        let resp = transport
            .request(&JsonRpcRequest::new(5, "tools/list", None))
            .await
            .unwrap();
        assert!(resp.matches_id(5));
    }

    #[tokio::test]
    async fn test_mismatched_id_is_protocol_error() {
        let (mut transport, mut server_in, mut server_out) = paired();

        tokio::spawn(async move {
            let _ = codec::read_message(&mut server_in).await.unwrap();
            codec::write_message(&mut server_out, &json!({"jsonrpc": "2.0", "id": 99, "result": {}}))
                .await
                .unwrap();
        });

        let err = transport
            .request(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ProtocolError { .. }));
    }

    #[tokio::test]
    async fn test_late_response_to_earlier_request_is_skipped() {
        let (mut transport, mut server_in, mut server_out) = paired();

        tokio::spawn(async move {
            let req = codec::read_message(&mut server_in).await.unwrap();
            // Reply to an abandoned request first, then to the current one.
            for id in [json!(2), req["id"].clone()] {
                codec::write_message(
                    &mut server_out,
                    &json!({"jsonrpc": "2.0", "id": id, "result": {"for": id}}),
                )
                .await
                .unwrap();
            }
        });

        let resp = transport
            .request(&JsonRpcRequest::new(3, "tools/list", None))
            .await
            .unwrap();
        assert!(resp.matches_id(3));
        assert_eq!(resp.result, Some(json!({"for": 3})));
    }

    #[tokio::test]
    async fn test_closed_peer_is_transport_error() {
        let (mut transport, server_in, server_out) = paired();
        drop(server_out);
        drop(server_in);

        let err = transport
            .request(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_notify_writes_frame() {
        let (mut transport, mut server_in, _server_out) = paired();
        transport
            .notify(&JsonRpcNotification::new("notifications/initialized", None))
            .await
            .unwrap();
        let note = codec::read_message(&mut server_in).await.unwrap();
        assert_eq!(note, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    /// Loopback HTTP peer answering one request per entry of `replies`
    /// with `(status, body)`. Yields the JSON bodies it received.
    async fn http_peer(
        replies: Vec<(u16, &'static str)>,
    ) -> (ServerConfig, tokio::task::JoinHandle<Vec<Value>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/mcp", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut received = Vec::new();
            for (status, body) in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "client hung up mid-request");
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let len = codec::parse_content_length(&buf[..header_end]).unwrap();
                while buf.len() < header_end + len {
                    let n = socket.read(&mut chunk).await.unwrap();
                    assert!(n > 0, "client hung up mid-body");
                    buf.extend_from_slice(&chunk[..n]);
                }
                received.push(serde_json::from_slice(&buf[header_end..header_end + len]).unwrap());

                let reason = if status < 300 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            received
        });

        (ServerConfig::http("remote", &url), handle)
    }

    #[tokio::test]
    async fn test_http_round_trip_then_server_error() {
        let (config, peer) = http_peer(vec![
            (200, r#"{"jsonrpc":"2.0","id":7,"result":{"tools":[]}}"#),
            (500, "internal failure"),
        ])
        .await;
        let mut transport = HttpTransport::new(&config).unwrap();

        let resp = transport
            .request(&JsonRpcRequest::new(7, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!({"tools": []})));

        let err = transport
            .request(&JsonRpcRequest::new(8, "tools/list", None))
            .await
            .unwrap_err();
        match err {
            McpError::TransportError { server, reason } => {
                assert_eq!(server, "remote");
                assert!(reason.contains("500"), "{reason}");
            }
            other => panic!("expected TransportError, got {other:?}"),
        }

        let received = peer.await.unwrap();
        assert_eq!(received[0]["method"], "tools/list");
        assert_eq!(received[0]["id"], 7);
        assert_eq!(received[1]["id"], 8);
    }

    #[tokio::test]
    async fn test_http_wrong_id_is_protocol_error() {
        let (config, _peer) =
            http_peer(vec![(200, r#"{"jsonrpc":"2.0","id":99,"result":{}}"#)]).await;
        let mut transport = HttpTransport::new(&config).unwrap();

        let err = transport
            .request(&JsonRpcRequest::new(1, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ProtocolError { .. }));
    }

    #[tokio::test]
    async fn test_http_notification_body_ignored() {
        let (config, peer) = http_peer(vec![(202, "not json")]).await;
        let mut transport = HttpTransport::new(&config).unwrap();

        transport
            .notify(&JsonRpcNotification::new("notifications/initialized", None))
            .await
            .unwrap();

        let received = peer.await.unwrap();
        assert_eq!(
            received,
            vec![json!({"jsonrpc": "2.0", "method": "notifications/initialized"})]
        );
    }

    #[test]
    fn test_http_requires_url() {
        let mut config = ServerConfig::http("remote", "http://127.0.0.1:1/mcp");
        config.url = None;
        assert!(HttpTransport::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_http_unreachable_is_transport_error() {
        // Port 1 on loopback refuses connections.
        let config = ServerConfig::http("remote", "http://127.0.0.1:1/mcp");
        let mut transport = HttpTransport::new(&config).unwrap();
        let err = transport
            .request(&JsonRpcRequest::new(0, "tools/list", None))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }
}
