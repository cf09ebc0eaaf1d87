//! Headless browser driver
//!
//! Launches a Chromium-family browser, speaks the remote debugging protocol over a
//! WebSocket and exposes tabs that can load pages, intercept their subresource
//! requests and extract links, titles and screenshots.

mod connection;
mod request;
mod tab;

#[cfg(test)]
pub(crate) mod testing;

pub use request::{PausedRequest, RequestInterceptor, Resolution};
pub use tab::{Navigation, Tab};

use crate::config::BrowserConfig;
use connection::Connection;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const DEFAULT_EXECUTABLES: &[&str] = &["chromium-browser", "chromium", "google-chrome"];
const LISTENING_PREFIX: &str = "DevTools listening on ";
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by the browser driver
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },

    #[error("Unexpected reply to {method}: {detail}")]
    Protocol { method: String, detail: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Tab is closed")]
    TabClosed,

    #[error("Navigated away before the page finished loading")]
    NavigatedAway,

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser connection closed")]
    ConnectionClosed,

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A running browser process and its debugging connection
pub struct Browser {
    connection: Arc<Connection>,
    child: Mutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    navigation_timeout: Duration,
}

impl Browser {
    /// Starts the browser and connects to its debugging endpoint
    ///
    /// When no executable is configured the usual Chromium names are tried in turn.
    pub async fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let candidates: Vec<String> = match &config.executable {
            Some(executable) => vec![executable.clone()],
            None => DEFAULT_EXECUTABLES.iter().map(|s| s.to_string()).collect(),
        };

        let mut child = None;
        for executable in &candidates {
            let spawned = Command::new(executable)
                .arg("--headless")
                .arg("--remote-debugging-port=0")
                .args(&config.extra_args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(spawned) => {
                    info!("Launched browser {}", executable);
                    child = Some(spawned);
                    break;
                }
                Err(e) => debug!("Could not run {}: {}", executable, e),
            }
        }
        let mut child = child.ok_or_else(|| {
            BrowserError::Launch(format!("couldn't execute any of: {}", candidates.join(", ")))
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BrowserError::Launch("stderr was not captured".to_string()))?;
        let (url_tx, url_rx) = oneshot::channel();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut url_tx = Some(url_tx);
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(url) = line.strip_prefix(LISTENING_PREFIX) {
                    if let Some(tx) = url_tx.take() {
                        let _ = tx.send(url.trim().to_string());
                        continue;
                    }
                }
                debug!(target: "tidemark::browser::stderr", "{}", line);
            }
        });

        let url = match tokio::time::timeout(LAUNCH_TIMEOUT, url_rx).await {
            Ok(Ok(url)) => url,
            Ok(Err(_)) => {
                return Err(BrowserError::Launch(
                    "browser exited before opening its debugging endpoint".to_string(),
                ))
            }
            Err(_) => {
                return Err(BrowserError::Launch(format!(
                    "no debugging endpoint announced within {:?}",
                    LAUNCH_TIMEOUT
                )))
            }
        };
        debug!("Connecting to {}", url);

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let connection = Connection::new(outgoing, Duration::from_secs(config.call_timeout_secs));

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Failed to send to browser: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_connection = Arc::clone(&connection);
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_connection.handle_message(&text),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        error!("Browser connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("Browser connection closed");
            reader_connection.fail_all();
        });

        Ok(Self {
            connection,
            child: Mutex::new(Some(child)),
            tasks: Mutex::new(vec![stderr_task, writer, reader]),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })
    }

    /// Wraps an already established connection
    #[cfg(test)]
    pub(crate) fn with_connection(connection: Arc<Connection>, navigation_timeout: Duration) -> Self {
        Self {
            connection,
            child: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            navigation_timeout,
        }
    }

    /// Longest time a page load is awaited
    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    pub async fn new_tab(&self) -> Result<Arc<Tab>, BrowserError> {
        Tab::open(Arc::clone(&self.connection)).await
    }

    /// Asks the browser to exit, then stops the process and the connection tasks
    pub async fn close(&self) {
        if let Err(e) = self.connection.call(None, "Browser.close", json!({})).await {
            debug!("Browser.close: {}", e);
        }
        self.connection.fail_all();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill browser process: {}", e);
            }
        }
    }
}
