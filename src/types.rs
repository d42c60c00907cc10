//! Core types: requests, responses, task states and events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// HTTP-style request method
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET (default)
    #[default]
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single logical request
///
/// Requests are built once and then handed to a
/// [`FetchClient`](crate::client::FetchClient) or
/// [`Dispatcher`](crate::dispatcher::Dispatcher); builder methods consume `self`.
///
/// ```
/// use fetch_dispatch::{Method, Request};
/// use std::time::Duration;
///
/// let request = Request::post("https://api.example.com/items", serde_json::json!({"id": 1}))
///     .with_timeout(Duration::from_secs(5))
///     .with_retries(1);
/// assert_eq!(request.method(), Method::Post);
/// assert_eq!(request.retries(), Some(1));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    target: String,
    #[serde(default)]
    method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,
}

impl Request {
    /// Request with an explicit method and no payload
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method,
            payload: None,
            timeout_ms: None,
            retries: None,
        }
    }

    /// GET request
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    /// POST request carrying a JSON payload
    pub fn post(target: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(Method::Post, target).with_payload(payload)
    }

    /// Attach a JSON payload
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Override the per-attempt timeout for this request
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Override the retry budget for this request (retries after the first attempt)
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Target identifier (usually a URL)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// JSON payload, if any
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Per-request timeout override
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Per-request retry budget override
    pub fn retries(&self) -> Option<u32> {
        self.retries
    }
}

/// Decoded body of a successful response
///
/// Serialized with an explicit `kind` so a text body never reads back as a JSON string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    /// Body declared as JSON
    Json(serde_json::Value),
    /// Any other body, decoded as (lossy) UTF-8 text
    Text(String),
}

impl Payload {
    /// JSON value, if the body was JSON
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Text body, if the body was not JSON
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Json(_) => None,
            Payload::Text(text) => Some(text),
        }
    }
}

/// Status code reserved for "no response received"
pub const STATUS_NO_RESPONSE: u16 = 0;

/// Result of one logical request
///
/// Carries either a decoded payload or an error message, never both.
/// Status 0 means no response was received at all (transport failure,
/// cancellation, or an internal fault in the dispatch unit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseRepr")]
pub struct Response {
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    /// Successful response (status < 400)
    pub fn success(status: u16, data: Payload) -> Self {
        Self {
            status,
            data: Some(data),
            error: None,
        }
    }

    /// Application-level rejection (status >= 400) carrying the response body as error
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            data: None,
            error: Some(body.into()),
        }
    }

    /// No response received
    pub fn transport_failure(error: impl Into<String>) -> Self {
        Self {
            status: STATUS_NO_RESPONSE,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Status code (0 when no response was received)
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Decoded payload of a successful response
    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    /// Error description for rejected or failed requests
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True if a payload is present
    pub fn is_success(&self) -> bool {
        self.data.is_some()
    }

    /// True if no response was received
    pub fn is_transport_failure(&self) -> bool {
        self.status == STATUS_NO_RESPONSE
    }

    /// Consume the response, returning the payload or the error message
    pub fn into_result(self) -> std::result::Result<Payload, String> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(format!("empty response with status {}", self.status)),
        }
    }
}

/// Wire shape of a [`Response`], checked before it becomes one
#[derive(Deserialize)]
struct ResponseRepr {
    status: u16,
    #[serde(default)]
    data: Option<Payload>,
    #[serde(default)]
    error: Option<String>,
}

impl TryFrom<ResponseRepr> for Response {
    type Error = String;

    fn try_from(repr: ResponseRepr) -> std::result::Result<Self, Self::Error> {
        match (repr.data, repr.error) {
            (Some(data), None) => Ok(Response::success(repr.status, data)),
            (None, Some(error)) => Ok(Response {
                status: repr.status,
                data: None,
                error: Some(error),
            }),
            (Some(_), Some(_)) => Err("response carries both data and error".to_string()),
            (None, None) => Err("response carries neither data nor error".to_string()),
        }
    }
}

/// Lifecycle state of a background task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Work is still running
    Running,
    /// Work finished without error
    Completed,
    /// Work returned an error or panicked
    Failed,
    /// Work was cancelled before finishing
    Cancelled,
}

impl TaskState {
    /// True for Completed, Failed and Cancelled
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }
}

/// Terminal outcome of a background task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Work finished without error
    Completed,
    /// Work returned an error or panicked
    Failed {
        /// Error or panic message
        error: String,
    },
    /// Work was cancelled before finishing
    Cancelled,
}

impl TaskOutcome {
    /// The terminal state this outcome corresponds to
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed => TaskState::Completed,
            TaskOutcome::Failed { .. } => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Task registered and spawned
    Started {
        /// Task name
        name: String,
    },

    /// Task finished without error
    Completed {
        /// Task name
        name: String,
    },

    /// Task returned an error or panicked
    Failed {
        /// Task name
        name: String,
        /// Error or panic message
        error: String,
    },

    /// Task was cancelled
    Cancelled {
        /// Task name
        name: String,
    },
}

impl TaskEvent {
    pub(crate) fn finished(name: String, outcome: &TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Completed => TaskEvent::Completed { name },
            TaskOutcome::Failed { error } => TaskEvent::Failed {
                name,
                error: error.clone(),
            },
            TaskOutcome::Cancelled => TaskEvent::Cancelled { name },
        }
    }

    /// Name of the task this event is about
    pub fn name(&self) -> &str {
        match self {
            TaskEvent::Started { name }
            | TaskEvent::Completed { name }
            | TaskEvent::Failed { name, .. }
            | TaskEvent::Cancelled { name } => name,
        }
    }
}
