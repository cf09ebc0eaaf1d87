use super::connection::Connection;
use super::request::{PausedRequest, RequestInterceptor, Resolution};
use super::BrowserError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

const OVERRIDE_DATE_AND_RANDOM_JS: &str = include_str!("js/override_date_and_random.js");
const SCROLL_DOWN_JS: &str = include_str!("js/scroll_down.js");
const EXTRACT_LINKS_JS: &str = "Array.from(document.querySelectorAll('a[href], area[href]'))\
    .map(link => link.protocol + '//' + link.host + link.pathname + link.search + link.hash)";

const VIEWPORT_WIDTH: u32 = 1366;
const VIEWPORT_HEIGHT: u32 = 768;

#[derive(Default)]
struct TabState {
    closed: bool,
    load: Option<oneshot::Sender<Result<(), BrowserError>>>,
    idle: Option<oneshot::Sender<()>>,
}

/// A browser tab attached through its own session
pub struct Tab {
    connection: Arc<Connection>,
    target_id: String,
    session_id: String,
    state: Mutex<TabState>,
    interceptor: Mutex<Option<Arc<dyn RequestInterceptor>>>,
}

/// A pending page load started by [`Tab::navigate`]
pub struct Navigation {
    load: oneshot::Receiver<Result<(), BrowserError>>,
    idle: oneshot::Receiver<()>,
}

impl Navigation {
    /// Waits until the load event fired and the main frame's network went idle
    pub async fn wait(self) -> Result<(), BrowserError> {
        let (load, idle) = tokio::join!(self.load, self.idle);
        load.map_err(|_| BrowserError::NavigatedAway)??;
        idle.map_err(|_| BrowserError::NavigatedAway)?;
        Ok(())
    }
}

impl Tab {
    /// Creates a blank target, attaches to it and enables page events
    pub(crate) async fn open(connection: Arc<Connection>) -> Result<Arc<Self>, BrowserError> {
        let created = connection
            .call(
                None,
                "Target.createTarget",
                json!({ "url": "about:blank", "width": VIEWPORT_WIDTH, "height": VIEWPORT_HEIGHT }),
            )
            .await?;
        let target_id = string_field(&created, "targetId", "Target.createTarget")?;

        let attached = connection
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = string_field(&attached, "sessionId", "Target.attachToTarget")?;

        let tab = Arc::new(Self {
            connection: Arc::clone(&connection),
            target_id,
            session_id: session_id.clone(),
            state: Mutex::new(TabState::default()),
            interceptor: Mutex::new(None),
        });

        let weak = Arc::downgrade(&tab);
        connection.register_session(
            session_id,
            Arc::new(move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(tab) = weak.upgrade() {
                        tab.handle_event(event).await;
                    }
                }
                .boxed()
            }),
        );

        let enabled = async {
            tab.call("Page.enable", json!({})).await?;
            tab.call("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
                .await
        }
        .await;
        if let Err(e) = enabled {
            let _ = tab.close().await;
            return Err(e);
        }

        debug!("Opened tab {}", tab.target_id);
        Ok(tab)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Sends a call within this tab's session
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::TabClosed);
        }
        self.connection
            .call(Some(&self.session_id), method, params)
            .await
    }

    /// Closes the target; closing twice is a no-op
    pub async fn close(&self) -> Result<(), BrowserError> {
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.idle.take();
            state.load.take()
        };
        if let Some(load) = pending {
            let _ = load.send(Err(BrowserError::TabClosed));
        }
        self.connection.unregister_session(&self.session_id);
        self.connection
            .call(
                None,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await?;
        debug!("Closed tab {}", self.target_id);
        Ok(())
    }

    /// Routes every subresource request of this tab through `interceptor`
    pub async fn intercept_requests(
        &self,
        interceptor: Arc<dyn RequestInterceptor>,
    ) -> Result<(), BrowserError> {
        *self.interceptor.lock() = Some(interceptor);
        self.call("Fetch.enable", json!({})).await?;
        Ok(())
    }

    /// Starts loading `url`, abandoning any navigation still in flight
    pub async fn navigate(&self, url: &str) -> Result<Navigation, BrowserError> {
        let (load_tx, load) = oneshot::channel();
        let (idle_tx, idle) = oneshot::channel();
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(BrowserError::TabClosed);
            }
            if let Some(previous) = state.load.replace(load_tx) {
                let _ = previous.send(Err(BrowserError::NavigatedAway));
            }
            state.idle = Some(idle_tx);
        }

        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(BrowserError::Navigation(format!("{}: {}", url, error)));
            }
        }
        Ok(Navigation { load, idle })
    }

    /// Captures the viewport as a JPEG
    pub async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let result = self
            .call("Page.captureScreenshot", json!({ "format": "jpeg" }))
            .await?;
        let data = string_field(&result, "data", "Page.captureScreenshot")?;
        Ok(STANDARD.decode(data)?)
    }

    /// Pins `Date` and seeds `Math.random` for documents loaded after this call
    pub async fn override_date_and_random(&self, date: DateTime<Utc>) -> Result<(), BrowserError> {
        let source =
            OVERRIDE_DATE_AND_RANDOM_JS.replace("DATE", &date.timestamp_millis().to_string());
        self.call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await?;
        Ok(())
    }

    /// Evaluates an expression in the page and returns its value
    pub async fn eval(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(BrowserError::Remote {
                method: "Runtime.evaluate".to_string(),
                message: details
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or("script threw an exception")
                    .to_string(),
            });
        }
        Ok(result
            .get("result")
            .and_then(|result| result.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Absolute targets of every `a[href]` and `area[href]` in the current document
    pub async fn extract_links(&self) -> Result<Vec<String>, BrowserError> {
        let value = self.eval(EXTRACT_LINKS_JS).await?;
        Ok(value
            .as_array()
            .map(|links| {
                links
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn title(&self) -> Result<String, BrowserError> {
        let value = self.eval("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Scrolls to the bottom step by step so lazily loaded content is requested
    pub async fn scroll_down(&self) -> Result<(), BrowserError> {
        self.call(
            "Runtime.evaluate",
            json!({ "expression": SCROLL_DOWN_JS, "awaitPromise": true }),
        )
        .await?;
        Ok(())
    }

    async fn handle_event(&self, event: Value) {
        let method = event
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let params = event.get("params").cloned().unwrap_or(Value::Null);

        match method {
            "Fetch.requestPaused" => self.handle_paused_request(&params).await,
            "Page.loadEventFired" => {
                if let Some(load) = self.state.lock().load.take() {
                    let _ = load.send(Ok(()));
                }
            }
            "Page.lifecycleEvent" => {
                let name = params.get("name").and_then(Value::as_str);
                let frame_id = params.get("frameId").and_then(Value::as_str);
                if name == Some("networkIdle") && frame_id == Some(self.target_id.as_str()) {
                    if let Some(idle) = self.state.lock().idle.take() {
                        let _ = idle.send(());
                    }
                }
            }
            _ => debug!("Unhandled event {}", method),
        }
    }

    async fn handle_paused_request(&self, params: &Value) {
        let Some(request) = PausedRequest::from_params(params) else {
            warn!("Malformed Fetch.requestPaused event: {}", params);
            return;
        };
        let request_id = request.id().to_string();
        let interceptor = self.interceptor.lock().clone();

        let resolution = match interceptor {
            Some(interceptor) => match interceptor.intercept(request).await {
                Ok(Some(resolution)) => resolution,
                Ok(None) => Resolution::continued(request_id),
                Err(e) => {
                    warn!("Request interceptor failed: {:#}", e);
                    Resolution::failed(request_id, "Failed")
                }
            },
            None => request.continue_normally(),
        };

        if let Err(e) = self.call(resolution.method(), resolution.params()).await {
            match &e {
                BrowserError::Remote { message, .. } if message.contains("Invalid InterceptionId") => {
                    trace!("Request already gone: {}", e)
                }
                _ => warn!("Failed to resolve paused request: {}", e),
            }
        }
    }
}

fn string_field(value: &Value, field: &str, method: &str) -> Result<String, BrowserError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::Protocol {
            method: method.to_string(),
            detail: format!("missing {}", field),
        })
}
