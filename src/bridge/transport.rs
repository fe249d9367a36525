//! HTTP transport for the MCP bridge
//!
//! The bridge needs two things from HTTP: a long-lived streaming GET read
//! line by line, and ad-hoc POSTs of JSON-RPC envelopes.

use super::protocol::JsonRpcRequest;
use crate::config::HomeAssistantConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

/// Lines of the push stream, in arrival order
pub type LineStream = BoxStream<'static, Result<String>>;

/// Transport used by the bridge
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Open the server-push stream. A non-success status is an error.
    async fn open_event_stream(&self) -> Result<LineStream>;

    /// POST one envelope to `url`. A non-success status is an error.
    async fn post(&self, url: &str, request: &JsonRpcRequest) -> Result<()>;
}

/// `reqwest`-backed transport authenticated with a bearer token
pub struct HttpTransport {
    client: reqwest::Client,
    sse_url: String,
    api_token: String,
}

impl HttpTransport {
    /// Create a transport for the given Home Assistant instance
    pub fn new(config: &HomeAssistantConfig) -> Result<Self> {
        // No overall timeout: the push stream stays open indefinitely
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            sse_url: config.sse_url(),
            api_token: config.api_token.clone(),
        })
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn open_event_stream(&self) -> Result<LineStream> {
        tracing::debug!(url = %self.sse_url, "Opening MCP event stream");

        let response = self
            .client
            .get(&self.sse_url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {}: {}", status, body)));
        }

        let bytes = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new())
            .map_err(|e| Error::Transport(format!("Event stream read failed: {}", e)));

        Ok(lines.boxed())
    }

    async fn post(&self, url: &str, request: &JsonRpcRequest) -> Result<()> {
        tracing::debug!(url, method = %request.method, id = ?request.id, "POST MCP request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("HTTP {}: {}", status, body)));
        }

        Ok(())
    }
}

/// In-memory transport: lines are pushed by the test, POSTs are recorded
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use futures::channel::mpsc;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Builds the full reply line for a request, if the fake server answers it
    pub type Responder = Box<dyn Fn(&JsonRpcRequest) -> Option<Value> + Send + Sync>;

    pub struct MockTransport {
        lines_tx: Mutex<Option<mpsc::UnboundedSender<Result<String>>>>,
        lines_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<String>>>>,
        open_error: Option<String>,
        failing_posts: AtomicUsize,
        posts: Mutex<Vec<(String, JsonRpcRequest)>>,
        responder: Option<Responder>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            let (tx, rx) = mpsc::unbounded();
            Self {
                lines_tx: Mutex::new(Some(tx)),
                lines_rx: Mutex::new(Some(rx)),
                open_error: None,
                failing_posts: AtomicUsize::new(0),
                posts: Mutex::new(Vec::new()),
                responder: None,
            }
        }

        pub fn with_responder(mut self, responder: Responder) -> Self {
            self.responder = Some(responder);
            self
        }

        pub fn failing_open(mut self, message: &str) -> Self {
            self.open_error = Some(message.to_string());
            self
        }

        pub fn fail_next_posts(self, count: usize) -> Self {
            self.failing_posts.store(count, Ordering::SeqCst);
            self
        }

        pub fn push_line(&self, line: impl Into<String>) {
            if let Some(tx) = self.lines_tx.lock().unwrap().as_ref() {
                let _ = tx.unbounded_send(Ok(line.into()));
            }
        }

        pub fn close_stream(&self) {
            self.lines_tx.lock().unwrap().take();
        }

        pub fn posts(&self) -> Vec<(String, JsonRpcRequest)> {
            self.posts.lock().unwrap().clone()
        }

        pub fn methods(&self) -> Vec<String> {
            self.posts().into_iter().map(|(_, r)| r.method).collect()
        }
    }

    /// Reply line for a correlated request
    pub fn reply(id: u64, result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    /// Fake MCP server answering the handshake, the catalog and tool calls
    pub fn home_assistant(tools: Value) -> Responder {
        Box::new(move |request| {
            let id = request.id?;
            let result = match request.method.as_str() {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "home-assistant", "version": "1.0"}
                }),
                "tools/list" => json!({ "tools": tools.clone() }),
                "tools/call" => {
                    let params = request.params.clone().unwrap_or(Value::Null);
                    let text = json!({
                        "success": true,
                        "result": format!("called {}", params["name"].as_str().unwrap_or("")),
                        "arguments": params["arguments"].clone(),
                    });
                    json!({"content": [{"type": "text", "text": text.to_string()}], "isError": false})
                }
                _ => request.params.clone().unwrap_or(Value::Null),
            };
            Some(reply(id, result))
        })
    }

    #[async_trait]
    impl McpTransport for MockTransport {
        async fn open_event_stream(&self) -> Result<LineStream> {
            if let Some(message) = &self.open_error {
                return Err(Error::Transport(message.clone()));
            }
            let rx = self
                .lines_rx
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Transport("stream already opened".to_string()))?;
            Ok(rx.boxed())
        }

        async fn post(&self, url: &str, request: &JsonRpcRequest) -> Result<()> {
            let remaining = self.failing_posts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_posts.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::Transport("HTTP 500: boom".to_string()));
            }

            self.posts
                .lock()
                .unwrap()
                .push((url.to_string(), request.clone()));

            if let Some(reply) = self.responder.as_ref().and_then(|r| r(request)) {
                self.push_line(format!("data: {}", reply));
            }
            Ok(())
        }
    }
}
