//! MCP request/response bridge to Home Assistant
//!
//! The push stream (SSE) carries two kinds of data lines: the submission
//! endpoint path, announced once right after the stream opens, and JSON-RPC
//! replies to requests previously POSTed to that endpoint. Requests are sent
//! by a single consumer draining an ordered command queue, so outbound order
//! always matches enqueue order.

use super::pending::PendingRequests;
use super::protocol::{
    is_reply, is_truthy, is_valid_message_path, sse_data, InitializeParams, JsonRpcReply, JsonRpcRequest,
    OutboundCommand, ToolDescriptor,
};
use super::transport::{HttpTransport, LineStream, McpTransport};
use crate::config::HomeAssistantConfig;
use crate::error::{Error, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Client side of Home Assistant's MCP server integration
pub struct McpBridge {
    base_url: String,
    transport: Arc<dyn McpTransport>,
    pending: Arc<PendingRequests>,
    command_tx: mpsc::UnboundedSender<OutboundCommand>,
    /// Taken by `connect_and_run`; a bridge runs at most once
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundCommand>>>,
    /// Submission endpoint, first announcement wins
    endpoint: watch::Sender<Option<String>>,
    /// Handshake complete
    ready: watch::Sender<bool>,
    request_timeout: Duration,
    retry_backoff: Duration,
    client_name: String,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

impl McpBridge {
    /// Create a bridge over an arbitrary transport
    pub fn new(config: &HomeAssistantConfig, transport: Arc<dyn McpTransport>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (endpoint, _) = watch::channel(None);
        let (ready, _) = watch::channel(false);
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transport,
            pending: Arc::new(PendingRequests::new()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            endpoint,
            ready,
            request_timeout: config.request_timeout(),
            retry_backoff: config.retry_backoff(),
            client_name: config.client_name.clone(),
        }
    }

    /// Create a bridge talking HTTP to the configured instance
    pub fn from_config(config: &HomeAssistantConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the push stream, perform the handshake and serve requests.
    ///
    /// Runs until the stream fails, the consumer receives a shutdown command,
    /// or the returned future is dropped. On every exit path the pending table
    /// is emptied so no caller is left waiting.
    pub async fn connect_and_run(&self) -> Result<()> {
        let commands = self
            .command_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| Error::Protocol("MCP bridge is already running".to_string()))?;

        let _reset = SessionReset(self);

        let stream = self.transport.open_event_stream().await?;
        tracing::info!("MCP event stream open");

        tokio::select! {
            result = self.read_event_stream(stream) => result,
            result = self.consume_commands(commands) => result,
            result = async {
                self.handshake().await?;
                std::future::pending::<Result<()>>().await
            } => result,
        }
    }

    /// Ask the command consumer to stop after draining earlier commands
    pub fn shutdown(&self) -> Result<()> {
        self.enqueue(OutboundCommand::Shutdown)
    }

    async fn handshake(&self) -> Result<()> {
        tracing::info!("Waiting for the messages endpoint from Home Assistant");
        self.wait_endpoint().await;

        let params = serde_json::to_value(InitializeParams::new(&self.client_name))?;
        let reply = self
            .submit_request_and_await("initialize", Some(params), self.request_timeout)
            .await?;
        tracing::debug!(reply = %reply, "initialize reply");

        if !is_truthy(&reply) {
            return Err(Error::Protocol(format!(
                "MCP initialize was not accepted: {}",
                reply
            )));
        }

        self.submit_request("notifications/initialized", None)?;
        self.ready.send_replace(true);
        tracing::info!("MCP session initialized");
        Ok(())
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Submission endpoint, once announced
    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.borrow().clone()
    }

    /// Whether the handshake completed
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Number of correlated calls awaiting a reply
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Suspend until the submission endpoint is known
    pub async fn wait_endpoint(&self) -> String {
        let mut rx = self.endpoint.subscribe();
        loop {
            if let Some(path) = rx.borrow_and_update().clone() {
                return path;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as self
                return std::future::pending().await;
            }
        }
    }

    /// Suspend until the handshake completed
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    // =========================================================================
    // Public calls
    // =========================================================================

    /// Fetch the remote tool catalog
    pub async fn get_tool_list(&self) -> Result<Vec<ToolDescriptor>> {
        self.wait_ready().await;
        let result = self
            .submit_request_and_await("tools/list", None, self.request_timeout)
            .await?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        tracing::info!(count = list.tools.len(), "Fetched MCP tool catalog");
        Ok(list.tools)
    }

    /// Invoke a remote tool and return its result payload
    pub async fn call_tool(&self, name: &str, params: Value) -> Result<Value> {
        self.wait_ready().await;
        tracing::info!(tool = name, "Calling MCP tool");
        self.submit_request_and_await(
            "tools/call",
            Some(json!({ "name": name, "arguments": params })),
            self.request_timeout,
        )
        .await
    }

    // =========================================================================
    // Request submission
    // =========================================================================

    /// Enqueue a fire-and-forget notification
    pub fn submit_request(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.enqueue(OutboundCommand::Submit(JsonRpcRequest::new(
            method, params, None,
        )))
    }

    /// Enqueue a correlated request and wait up to `timeout` for its reply.
    ///
    /// The pending entry is evicted on every outcome, including cancellation
    /// of the returned future.
    pub async fn submit_request_and_await(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (guard, reply) = self.pending.register();
        let id = guard.id();

        self.enqueue(OutboundCommand::Submit(JsonRpcRequest::new(
            method,
            params,
            Some(id),
        )))?;

        let outcome = tokio::time::timeout(timeout, reply).await;
        drop(guard);

        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(Error::Rpc {
                code: error.code,
                message: error.message,
            }),
            Ok(Err(_)) => Err(Error::ConnectionClosed(format!(
                "no reply for request {} ({})",
                id, method
            ))),
            Err(_) => {
                tracing::error!(id, method, "[RPC] Timeout waiting reply");
                Err(Error::Timeout {
                    id,
                    method: method.to_string(),
                })
            }
        }
    }

    fn enqueue(&self, command: OutboundCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::ConnectionClosed("MCP command queue is not running".to_string()))
    }

    // =========================================================================
    // Push stream
    // =========================================================================

    async fn read_event_stream(&self, mut stream: LineStream) -> Result<()> {
        while let Some(line) = stream.next().await {
            self.handle_stream_line(&line?);
        }
        Err(Error::ConnectionClosed("MCP event stream ended".to_string()))
    }

    /// Process one raw line of the push stream. Never fails.
    pub(crate) fn handle_stream_line(&self, line: &str) {
        let Some(data) = sse_data(line) else {
            return;
        };

        match serde_json::from_str::<Value>(data) {
            Ok(value) => self.handle_reply(value),
            Err(_) if is_valid_message_path(data) => self.set_endpoint(data),
            Err(_) => tracing::error!("Not JSON data received: '{}'", data),
        }
    }

    fn handle_reply(&self, value: Value) {
        if !is_reply(&value) {
            tracing::debug!("Ignoring non-reply message: {}", value);
            return;
        }

        let reply: JsonRpcReply = match serde_json::from_value(value) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Unexpected event payload: {}", e);
                return;
            }
        };

        let Some(id) = reply.id else {
            tracing::debug!("Ignoring event without id");
            return;
        };

        if self.pending.resolve(id, reply.into_outcome()) {
            tracing::debug!(id, "Reply delivered");
        } else {
            tracing::debug!(id, "No pending request for reply, discarded");
        }
    }

    fn set_endpoint(&self, path: &str) {
        let accepted = self.endpoint.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(path.to_string());
                true
            } else {
                false
            }
        });

        if accepted {
            tracing::info!(endpoint = path, "Messages endpoint received");
        } else {
            tracing::warn!(endpoint = path, "Ignoring repeated messages endpoint");
        }
    }

    // =========================================================================
    // Command consumer
    // =========================================================================

    async fn consume_commands(
        &self,
        mut commands: mpsc::UnboundedReceiver<OutboundCommand>,
    ) -> Result<()> {
        let url = format!("{}{}", self.base_url, self.wait_endpoint().await);

        while let Some(command) = commands.recv().await {
            match command {
                OutboundCommand::Submit(request) => {
                    if let Err(e) = self.transport.post(&url, &request).await {
                        tracing::error!(
                            method = %request.method,
                            id = ?request.id,
                            "Command processor error: {}",
                            e
                        );
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
                OutboundCommand::Shutdown => {
                    tracing::info!("MCP command processor shutting down");
                    return Ok(());
                }
            }
        }

        Err(Error::ConnectionClosed("MCP command queue closed".to_string()))
    }
}

/// Resets per-connection state however `connect_and_run` exits
struct SessionReset<'a>(&'a McpBridge);

impl Drop for SessionReset<'_> {
    fn drop(&mut self) {
        let dropped = self.0.pending.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "Dropped pending MCP requests on disconnect");
        }
        self.0.ready.send_replace(false);
    }
}
