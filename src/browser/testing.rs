//! A scripted stand-in for the browser end of a debugging connection

use super::connection::Connection;
use super::Browser;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const TARGET_ID: &str = "T1";
pub(crate) const SESSION_ID: &str = "S1";

pub(crate) struct FakeRemote {
    connection: Arc<Connection>,
    sent: Arc<Mutex<Vec<Value>>>,
    page_events: Arc<AtomicBool>,
}

impl FakeRemote {
    /// Starts answering calls; must run inside a tokio runtime
    pub(crate) fn start() -> Self {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let connection = Connection::new(outgoing, Duration::from_secs(2));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let page_events = Arc::new(AtomicBool::new(true));

        let weak = Arc::downgrade(&connection);
        let recorded = Arc::clone(&sent);
        let events = Arc::clone(&page_events);
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                let Ok(call) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                recorded.lock().push(call.clone());
                let Some(connection) = weak.upgrade() else {
                    break;
                };
                for reply in replies_to(&call, events.load(Ordering::SeqCst)) {
                    connection.handle_message(&reply.to_string());
                }
            }
        });

        Self {
            connection,
            sent,
            page_events,
        }
    }

    /// Stops emitting load and network-idle events after navigations
    pub(crate) fn without_page_events(self) -> Self {
        self.page_events.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    pub(crate) fn browser(&self) -> Browser {
        Browser::with_connection(self.connection(), Duration::from_secs(2))
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|call| call["method"].as_str().map(str::to_string))
            .collect()
    }

    pub(crate) fn last_call(&self, method: &str) -> Option<Value> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|call| call["method"] == method)
            .cloned()
    }

    pub(crate) async fn wait_for_call(&self, method: &str) -> Value {
        for _ in 0..200 {
            if let Some(call) = self.last_call(method) {
                return call;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} was never called", method);
    }

    /// Delivers a `Fetch.requestPaused` event to the attached session
    pub(crate) fn pause_request(&self, request_id: &str, url: &str, resource_type: &str) {
        let event = json!({
            "method": "Fetch.requestPaused",
            "sessionId": SESSION_ID,
            "params": {
                "requestId": request_id,
                "resourceType": resource_type,
                "request": { "url": url, "method": "GET", "headers": {} }
            }
        });
        self.connection.handle_message(&event.to_string());
    }
}

fn replies_to(call: &Value, page_events: bool) -> Vec<Value> {
    let method = call["method"].as_str().unwrap_or_default();
    let params = &call["params"];
    let mut navigated = false;

    let result = match method {
        "Target.createTarget" => json!({ "targetId": TARGET_ID }),
        "Target.attachToTarget" => json!({ "sessionId": SESSION_ID }),
        "Page.navigate" => {
            let url = params["url"].as_str().unwrap_or_default();
            if url.contains(".invalid") {
                json!({ "frameId": TARGET_ID, "errorText": "net::ERR_NAME_NOT_RESOLVED" })
            } else {
                navigated = true;
                json!({ "frameId": TARGET_ID, "loaderId": "L1" })
            }
        }
        "Page.captureScreenshot" => json!({ "data": STANDARD.encode(b"jpeg-bytes") }),
        "Runtime.evaluate" => {
            let expression = params["expression"].as_str().unwrap_or_default();
            if expression == "document.title" {
                json!({ "result": { "type": "string", "value": "Fake title" } })
            } else if expression.contains("querySelectorAll") {
                json!({ "result": { "type": "object", "value": ["http://example.com/next"] } })
            } else {
                json!({ "result": { "type": "undefined" } })
            }
        }
        _ => json!({}),
    };

    let mut replies = vec![json!({ "id": call["id"], "result": result })];
    if navigated && page_events {
        replies.push(json!({
            "method": "Page.loadEventFired",
            "sessionId": SESSION_ID,
            "params": { "timestamp": 1.0 }
        }));
        replies.push(json!({
            "method": "Page.lifecycleEvent",
            "sessionId": SESSION_ID,
            "params": { "frameId": TARGET_ID, "loaderId": "L1", "name": "networkIdle", "timestamp": 1.0 }
        }));
    }
    replies
}
