use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};

/// A subresource request paused by the browser, waiting for a decision
///
/// Every resolution method consumes the request, so a request can be resolved at
/// most once.
#[derive(Debug)]
pub struct PausedRequest {
    request_id: String,
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    resource_type: Option<String>,
}

impl PausedRequest {
    /// Builds a request from `Fetch.requestPaused` event parameters
    pub(crate) fn from_params(params: &Value) -> Option<Self> {
        let request = params.get("request")?;
        let headers = request
            .get("headers")
            .and_then(Value::as_object)
            .map(|headers| {
                headers
                    .iter()
                    .map(|(name, value)| {
                        let value = match value {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            request_id: params.get("requestId")?.as_str()?.to_string(),
            url: request.get("url")?.as_str()?.to_string(),
            method: request
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_string(),
            headers,
            resource_type: params
                .get("resourceType")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn id(&self) -> &str {
        &self.request_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The browser's resource type, e.g. `Image` or `Script`
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    /// Answers the request with the given response
    pub fn fulfill(
        self,
        status: u16,
        reason: &str,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Resolution {
        Resolution {
            kind: ResolutionKind::Fulfill {
                request_id: self.request_id,
                status,
                reason: reason.trim().to_string(),
                headers,
                body,
            },
        }
    }

    /// Fails the request with a network error reason such as `AccessDenied`
    pub fn fail(self, reason: &str) -> Resolution {
        Resolution::failed(self.request_id, reason)
    }

    /// Lets the browser perform the request itself
    pub fn continue_normally(self) -> Resolution {
        Resolution::continued(self.request_id)
    }
}

/// The single outcome chosen for a paused request
#[derive(Debug)]
pub struct Resolution {
    kind: ResolutionKind,
}

#[derive(Debug)]
enum ResolutionKind {
    Fulfill {
        request_id: String,
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Fail {
        request_id: String,
        reason: String,
    },
    Continue {
        request_id: String,
    },
}

impl Resolution {
    pub(crate) fn failed(request_id: String, reason: &str) -> Self {
        Self {
            kind: ResolutionKind::Fail {
                request_id,
                reason: reason.to_string(),
            },
        }
    }

    pub(crate) fn continued(request_id: String) -> Self {
        Self {
            kind: ResolutionKind::Continue { request_id },
        }
    }

    /// Remote method that applies this resolution
    pub fn method(&self) -> &'static str {
        match self.kind {
            ResolutionKind::Fulfill { .. } => "Fetch.fulfillRequest",
            ResolutionKind::Fail { .. } => "Fetch.failRequest",
            ResolutionKind::Continue { .. } => "Fetch.continueRequest",
        }
    }

    pub fn params(&self) -> Value {
        match &self.kind {
            ResolutionKind::Fulfill {
                request_id,
                status,
                reason,
                headers,
                body,
            } => {
                let headers: Vec<Value> = headers
                    .iter()
                    .map(|(name, value)| json!({ "name": name, "value": value }))
                    .collect();
                let mut params = json!({
                    "requestId": request_id,
                    "responseCode": status,
                    "responseHeaders": headers,
                    "body": STANDARD.encode(body),
                });
                if !reason.is_empty() {
                    params["responsePhrase"] = json!(reason);
                }
                params
            }
            ResolutionKind::Fail { request_id, reason } => {
                json!({ "requestId": request_id, "errorReason": reason })
            }
            ResolutionKind::Continue { request_id } => json!({ "requestId": request_id }),
        }
    }
}

/// Decides what happens to each subresource request of an intercepting tab
///
/// Returning `Ok(None)` lets the request continue normally; returning an error fails
/// it with a generic reason.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn intercept(&self, request: PausedRequest) -> anyhow::Result<Option<Resolution>>;
}
