//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection, every page session multiplexed on it
//! 2. Request/response matching via ID, events routed to the owning session
//! 3. Connection loss is observable through a watch channel, so the pool can
//!    drop stale handles instead of discovering them one failed call at a time
//! 4. Fail fast - no retries, no queuing. Let the caller decide.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Connection closed")]
    Closed,
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    pending: Arc<DashMap<RequestId, oneshot::Sender<CDPResponse>>>,

    /// Browser-level subscribers, keyed by method name
    subscribers: Arc<DashMap<String, Vec<EventCallback>>>,

    /// One callback per attached session; receives every event for that session
    session_subscribers: Arc<DashMap<SessionId, EventCallback>>,

    /// WebSocket write half
    ws_sink: Mutex<WsSink>,

    /// Flips to `true` once the receive loop exits
    closed: watch::Sender<bool>,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();
        let (closed, _) = watch::channel(false);

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            session_subscribers: Arc::new(DashMap::new()),
            ws_sink: Mutex::new(sink),
            closed,
        });

        // The receive loop holds a weak reference so dropping the client ends it
        let weak = Arc::downgrade(&client);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Some(client) = weak.upgrade() else {
                    return;
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = client.handle_message(&text) {
                            tracing::error!("[CDP] Failed to handle message: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("[CDP] WebSocket closed by browser");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("[CDP] WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            if let Some(client) = weak.upgrade() {
                client.mark_closed();
            }
        });

        tracing::info!("[CDP] Connected to {}", ws_url);
        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CDPError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let json = serde_json::to_string(&request)?;
        let sent = self.ws_sink.lock().await.send(Message::Text(json)).await;
        if let Err(e) = sent {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }

        // Sender is dropped when the connection goes away
        let response = rx.await.map_err(|_| CDPError::Closed)?;

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Subscribe to browser-level CDP events by method name
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        self.subscribers
            .entry(method.into())
            .or_default()
            .push(callback);
    }

    /// Route every event of `session_id` to `callback`, replacing any previous one
    pub fn subscribe_session(&self, session_id: SessionId, callback: EventCallback) {
        self.session_subscribers.insert(session_id, callback);
    }

    pub fn unsubscribe_session(&self, session_id: &str) {
        self.session_subscribers.remove(session_id);
    }

    /// Whether the underlying WebSocket has gone away
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Watch channel that flips to `true` when the connection is lost
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn mark_closed(&self) {
        // Dropping the senders fails every in-flight request with `Closed`
        self.pending.clear();
        self.session_subscribers.clear();
        self.closed.send_replace(true);
    }

    /// Handle incoming WebSocket message
    fn handle_message(&self, text: &str) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response); // Receiver may have timed out
                } else {
                    tracing::warn!("[CDP] Response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => self.dispatch(event),
        }

        Ok(())
    }

    fn dispatch(&self, event: CDPEvent) {
        if let Some(session_id) = event.routing_session() {
            // Clone the callback out so a handler may unsubscribe itself
            let callback = self
                .session_subscribers
                .get(session_id)
                .map(|entry| entry.value().clone());
            if let Some(callback) = callback {
                callback(event.clone());
            }
        }

        let callbacks = self
            .subscribers
            .get(&event.method)
            .map(|entry| entry.value().clone());
        for callback in callbacks.into_iter().flatten() {
            callback(event.clone());
        }
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let result = self.ws_sink.lock().await.close().await;
        self.mark_closed();
        result.map_err(CDPError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Needs running Chrome
    async fn test_connect() {
        let client = CDPClient::connect("ws://localhost:9222/devtools/browser")
            .await
            .unwrap();

        let result = client
            .send_request("Browser.getVersion", None, None)
            .await
            .unwrap();

        println!("Browser version: {:?}", result);
        client.close().await.unwrap();
        assert!(client.is_closed());
    }
}
