use super::BrowserError;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Receives the events addressed to one attached session
pub(crate) type EventHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

const MAX_LOGGED_MESSAGE: usize = 1024;

struct PendingCall {
    method: String,
    reply: oneshot::Sender<Result<Value, BrowserError>>,
}

/// One multiplexed remote-debugging connection
///
/// Calls are correlated with their responses by id; events are routed to the handler
/// registered for their session.
pub(crate) struct Connection {
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, PendingCall>>,
    sessions: Mutex<HashMap<String, EventHandler>>,
    call_timeout: Duration,
}

impl Connection {
    pub(crate) fn new(outgoing: mpsc::UnboundedSender<String>, call_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            outgoing,
            next_id: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            call_timeout,
        })
    }

    /// Sends a call and waits for its response
    pub(crate) async fn call(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, BrowserError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            message["sessionId"] = json!(session_id);
        }
        let text = message.to_string();
        trace!("> {}", truncate(&text));

        let (reply, response) = oneshot::channel();
        self.calls.lock().insert(
            id,
            PendingCall {
                method: method.to_string(),
                reply,
            },
        );

        if self.outgoing.send(text).is_err() {
            self.calls.lock().remove(&id);
            return Err(BrowserError::ConnectionClosed);
        }

        match tokio::time::timeout(self.call_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrowserError::ConnectionClosed),
            Err(_) => {
                self.calls.lock().remove(&id);
                Err(BrowserError::Timeout {
                    method: method.to_string(),
                    timeout: self.call_timeout,
                })
            }
        }
    }

    pub(crate) fn register_session(&self, session_id: String, handler: EventHandler) {
        self.sessions.lock().insert(session_id, handler);
    }

    pub(crate) fn unregister_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Dispatches one incoming message
    pub(crate) fn handle_message(&self, raw: &str) {
        trace!("< {}", truncate(raw));
        let message: Value = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed browser message: {}", e);
                return;
            }
        };

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            let Some(session_id) = message.get("sessionId").and_then(Value::as_str) else {
                debug!("Browser event {}", method);
                return;
            };
            let handler = self.sessions.lock().get(session_id).cloned();
            match handler {
                Some(handler) => {
                    tokio::spawn(handler(message));
                }
                None => warn!("Event {} for unknown session {}", method, session_id),
            }
            return;
        }

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            warn!("Browser message has neither method nor id");
            return;
        };
        let Some(pending) = self.calls.lock().remove(&id) else {
            warn!("Response to unknown call {}", id);
            return;
        };

        let result = match message.get("error") {
            Some(error) => Err(BrowserError::Remote {
                method: pending.method,
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            }),
            None => Ok(message.get("result").cloned().unwrap_or_else(|| json!({}))),
        };
        let _ = pending.reply.send(result);
    }

    /// Fails every outstanding call, used once the socket has gone away
    pub(crate) fn fail_all(&self) {
        let pending: Vec<PendingCall> = self.calls.lock().drain().map(|(_, call)| call).collect();
        for call in pending {
            let _ = call.reply.send(Err(BrowserError::ConnectionClosed));
        }
        self.sessions.lock().clear();
    }
}

fn truncate(message: &str) -> &str {
    if message.len() <= MAX_LOGGED_MESSAGE {
        return message;
    }
    let mut end = MAX_LOGGED_MESSAGE;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
