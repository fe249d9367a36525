//! Home Assistant WebSocket event listener
//!
//! Authenticates with the access token, subscribes to the configured event
//! types and forwards every change notification to an [`EventSink`].

use super::sink::EventSink;
use super::types::{ClientFrame, NormalizedEvent, ServerFrame};
use crate::config::HomeAssistantConfig;
use crate::error::{Error, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Listener for the Home Assistant event bus
pub struct EventListener {
    websocket_url: String,
    api_token: String,
    event_types: Vec<String>,
    sink: Arc<dyn EventSink>,
}

impl EventListener {
    /// Create a listener
    pub fn new(
        websocket_url: impl Into<String>,
        api_token: impl Into<String>,
        event_types: Vec<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            websocket_url: websocket_url.into(),
            api_token: api_token.into(),
            event_types,
            sink,
        }
    }

    /// Create a listener for the configured instance
    pub fn from_config(config: &HomeAssistantConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        Ok(Self::new(
            config.websocket_url()?,
            config.api_token.clone(),
            config.event_types.clone(),
            sink,
        ))
    }

    /// Connect, authenticate, subscribe and forward events.
    ///
    /// Returns `Ok(())` when the server closes an established session and an
    /// error on handshake violations or socket failures.
    pub async fn listen(&self) -> Result<()> {
        tracing::debug!(url = %self.websocket_url, "Connecting to Home Assistant WebSocket");
        let (ws, _) = tokio_tungstenite::connect_async(self.websocket_url.as_str()).await?;
        self.run(ws).await
    }

    async fn run<S>(&self, mut ws: S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        self.authenticate(&mut ws).await?;
        self.subscribe(&mut ws).await?;

        loop {
            match next_text(&mut ws).await {
                Ok(text) => self.handle_frame(&text).await,
                Err(Error::ConnectionClosed(reason)) => {
                    tracing::info!(reason = %reason, "Home Assistant WebSocket closed");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn authenticate<S>(&self, ws: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        let first = next_text(ws).await?;
        match serde_json::from_str::<ServerFrame>(&first) {
            Ok(ServerFrame::AuthRequired { ha_version }) => {
                tracing::debug!(ha_version = ?ha_version, "Authentication requested");
            }
            _ => return Err(Error::Protocol(format!("Unexpected first frame: {}", first))),
        }

        send_frame(
            ws,
            &ClientFrame::Auth {
                access_token: self.api_token.clone(),
            },
        )
        .await?;

        let reply = next_text(ws).await?;
        match serde_json::from_str::<ServerFrame>(&reply) {
            Ok(ServerFrame::AuthOk { ha_version }) => {
                tracing::info!(ha_version = ?ha_version, "Logged in to the Home Assistant WebSocket");
                Ok(())
            }
            Ok(ServerFrame::AuthInvalid { message }) => Err(Error::Protocol(format!(
                "Auth invalid: {}",
                message.unwrap_or_else(|| "no reason given".to_string())
            ))),
            _ => Err(Error::Protocol(format!("Auth failed: {}", reply))),
        }
    }

    /// One subscription per event type, or a single catch-all one
    async fn subscribe<S>(&self, ws: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin,
    {
        let topics: Vec<Option<String>> = if self.event_types.is_empty() {
            vec![None]
        } else {
            self.event_types.iter().cloned().map(Some).collect()
        };

        let mut next_id: u64 = 1;
        for topic in topics {
            let id = next_id;
            next_id += 1;

            send_frame(
                ws,
                &ClientFrame::SubscribeEvents {
                    event_type: topic.clone(),
                    id,
                },
            )
            .await?;

            // Events of earlier subscriptions may arrive before this ack
            loop {
                let text = next_text(ws).await?;
                match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(ServerFrame::Result {
                        id: reply_id,
                        success,
                        error,
                    }) if reply_id.map_or(true, |r| r == id) => {
                        if success {
                            tracing::debug!(id, topic = ?topic, "Subscribed to events");
                        } else {
                            tracing::warn!(id, topic = ?topic, error = ?error, "Subscription rejected");
                        }
                        break;
                    }
                    Ok(frame) => self.dispatch(frame).await,
                    Err(e) => tracing::warn!("Skipping malformed frame: {}", e),
                }
            }
        }

        Ok(())
    }

    async fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<ServerFrame>(text) {
            Ok(frame) => self.dispatch(frame).await,
            Err(e) => tracing::warn!("Skipping malformed frame: {}", e),
        }
    }

    /// Forward state changes; every other frame is logged and dropped
    async fn dispatch(&self, frame: ServerFrame) {
        let raw = match frame {
            ServerFrame::Event { event } => event,
            other => {
                tracing::debug!(frame = ?other, "Discarding frame");
                return;
            }
        };

        let event_type = raw.event_type.clone();
        match NormalizedEvent::from_raw(raw) {
            Some(event) => {
                tracing::debug!(
                    entity_id = %event.entity_id,
                    state = %event.state,
                    event_type = %event.event_type,
                    "Forwarding event"
                );
                self.sink.record(event).await;
            }
            None => tracing::debug!(event_type = %event_type, "Discarding non-state event"),
        }
    }
}

/// Next text frame; control and binary frames are skipped
async fn next_text<S>(ws: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(text),
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "close frame".to_string());
                return Err(Error::ConnectionClosed(reason));
            }
            _ => {}
        }
    }
    Err(Error::ConnectionClosed("stream ended".to_string()))
}

async fn send_frame<S>(ws: &mut S, frame: &ClientFrame) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::sink::ChannelSink;
    use serde_json::{json, Value};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::WebSocketStream;

    type ServerWs = WebSocketStream<TcpStream>;

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/api/websocket", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn send_json(ws: &mut ServerWs, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn send_raw(ws: &mut ServerWs, text: &str) {
        ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    async fn recv_json(ws: &mut ServerWs) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    /// Server side of a successful login; returns the auth frame
    async fn login(ws: &mut ServerWs) -> Value {
        send_json(ws, json!({"type": "auth_required", "ha_version": "2024.5.0"})).await;
        let auth = recv_json(ws).await;
        send_json(ws, json!({"type": "auth_ok", "ha_version": "2024.5.0"})).await;
        auth
    }

    fn state_changed(entity_id: &str, state: &str) -> Value {
        json!({
            "id": 1,
            "type": "event",
            "event": {
                "data": {
                    "entity_id": entity_id,
                    "new_state": {"state": state, "attributes": {"friendly_name": entity_id}}
                },
                "time_fired": "2024-05-01T10:00:00+00:00",
                "event_type": "state_changed"
            }
        })
    }

    fn make_listener(
        url: &str,
        event_types: &[&str],
    ) -> (EventListener, mpsc::Receiver<NormalizedEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let listener = EventListener::new(
            url,
            "test_token",
            event_types.iter().map(|s| s.to_string()).collect(),
            Arc::new(ChannelSink::new(tx)),
        );
        (listener, rx)
    }

    #[tokio::test]
    async fn test_full_session() {
        let (tcp, url) = bind().await;
        let server: JoinHandle<Vec<Value>> = tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            let mut received = vec![login(&mut ws).await];

            for _ in 0..2 {
                let sub = recv_json(&mut ws).await;
                send_json(&mut ws, json!({"id": sub["id"], "type": "result", "success": true}))
                    .await;
                received.push(sub);
            }

            send_raw(&mut ws, "garbage{").await;
            send_json(&mut ws, state_changed("light.kitchen", "on")).await;
            send_json(&mut ws, json!({"type": "pong", "id": 9})).await;
            send_json(&mut ws, state_changed("switch.fan", "off")).await;
            ws.close(None).await.unwrap();
            received
        });

        let (listener, mut rx) = make_listener(&url, &["state_changed", "call_service"]);
        listener.listen().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0], json!({"type": "auth", "access_token": "test_token"}));
        assert_eq!(
            received[1],
            json!({"type": "subscribe_events", "event_type": "state_changed", "id": 1})
        );
        assert_eq!(
            received[2],
            json!({"type": "subscribe_events", "event_type": "call_service", "id": 2})
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.entity_id, "light.kitchen");
        assert_eq!(first.state, "on");
        assert_eq!(first.attributes, "{\"friendly_name\":\"light.kitchen\"}");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.entity_id, "switch.fan");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_catch_all_subscription() {
        let (tcp, url) = bind().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            login(&mut ws).await;
            let sub = recv_json(&mut ws).await;
            send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;
            ws.close(None).await.unwrap();
            sub
        });

        let (listener, _rx) = make_listener(&url, &[]);
        listener.listen().await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            json!({"type": "subscribe_events", "id": 1})
        );
    }

    #[tokio::test]
    async fn test_catch_all_forwards_only_state_changes() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            login(&mut ws).await;
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;
            send_json(
                &mut ws,
                json!({
                    "id": 1,
                    "type": "event",
                    "event": {
                        "event_type": "call_service",
                        "data": {"domain": "light", "service": "turn_on"},
                        "time_fired": "2024-05-01T10:00:00+00:00"
                    }
                }),
            )
            .await;
            send_json(&mut ws, state_changed("light.porch", "off")).await;
            ws.close(None).await.unwrap();
        });

        let (listener, mut rx) = make_listener(&url, &[]);
        listener.listen().await.unwrap();

        assert_eq!(rx.recv().await.unwrap().entity_id, "light.porch");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unexpected_first_frame_is_fatal() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            send_json(&mut ws, json!({"type": "auth_ok"})).await;
            let _ = ws.next().await;
        });

        let (listener, _rx) = make_listener(&url, &["state_changed"]);
        let err = listener.listen().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_invalid_auth_is_fatal() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            send_json(&mut ws, json!({"type": "auth_required"})).await;
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({"type": "auth_invalid", "message": "Invalid password"}))
                .await;
            let _ = ws.next().await;
        });

        let (listener, _rx) = make_listener(&url, &["state_changed"]);
        let err = listener.listen().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg.contains("Invalid password")));
    }

    #[tokio::test]
    async fn test_rejected_subscription_is_not_fatal() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            login(&mut ws).await;
            recv_json(&mut ws).await;
            send_json(
                &mut ws,
                json!({"id": 1, "type": "result", "success": false, "error": {"code": "unauthorized"}}),
            )
            .await;
            send_json(&mut ws, state_changed("light.x", "on")).await;
            ws.close(None).await.unwrap();
        });

        let (listener, mut rx) = make_listener(&url, &["state_changed"]);
        listener.listen().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().entity_id, "light.x");
    }

    #[tokio::test]
    async fn test_event_before_ack_is_forwarded() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            login(&mut ws).await;
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({"id": 1, "type": "result", "success": true})).await;
            recv_json(&mut ws).await;
            // Event of the first subscription races the second ack
            send_json(&mut ws, state_changed("light.early", "on")).await;
            send_json(&mut ws, json!({"id": 2, "type": "result", "success": true})).await;
            ws.close(None).await.unwrap();
        });

        let (listener, mut rx) = make_listener(&url, &["state_changed", "automation_triggered"]);
        listener.listen().await.unwrap();
        assert_eq!(rx.recv().await.unwrap().entity_id, "light.early");
    }

    #[tokio::test]
    async fn test_close_before_auth_is_an_error() {
        let (tcp, url) = bind().await;
        tokio::spawn(async move {
            let mut ws = accept(tcp).await;
            ws.close(None).await.unwrap();
        });

        let (listener, _rx) = make_listener(&url, &["state_changed"]);
        let err = listener.listen().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(_)));
    }
}
