//! Transport abstraction the fetch client calls into
//!
//! The crate ships no concrete network transport; applications plug in their own
//! HTTP client (or anything else that can answer a method + target) by
//! implementing [`Transport`].

use crate::error::TransportError;
use crate::types::Method;
use std::time::Duration;

/// Options passed along with each transport call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallOptions {
    /// JSON payload to send, if any
    pub payload: Option<serde_json::Value>,
    /// Timeout the fetch client enforces around this attempt
    ///
    /// Transports may use it to configure their own deadlines; the client
    /// enforces it regardless.
    pub timeout: Duration,
}

/// Raw response as returned by the transport
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// Status code
    pub status: u16,
    /// Declared content type (e.g. `application/json; charset=utf-8`)
    pub content_type: Option<String>,
    /// Undecoded body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Response with a JSON body
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: value.to_string().into_bytes(),
        }
    }

    /// Response with a plain text body
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain".to_string()),
            body: body.into().into_bytes(),
        }
    }

    /// True if the declared content type is JSON
    pub fn is_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        })
    }

    /// Body decoded as lossy UTF-8
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Abstraction over the network, enabling testability.
///
/// Implementations report transport-level faults (connection, timeout, protocol)
/// as `Err`. A response with an error status is still `Ok`: the fetch client
/// decides what to do with it.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Perform one attempt of a request
    async fn call(
        &self,
        method: Method,
        target: &str,
        options: &CallOptions,
    ) -> Result<RawResponse, TransportError>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_type_detection_ignores_parameters_and_case() {
        let mut raw = RawResponse::text(200, "{}");
        assert!(!raw.is_json());

        raw.content_type = Some("Application/JSON; charset=utf-8".into());
        assert!(raw.is_json());

        raw.content_type = Some("application/jsonp".into());
        assert!(!raw.is_json());

        raw.content_type = None;
        assert!(!raw.is_json());
    }

    #[test]
    fn text_body_replaces_invalid_utf8() {
        let raw = RawResponse {
            status: 200,
            content_type: None,
            body: vec![b'o', b'k', 0xff],
        };
        assert_eq!(raw.text_body(), "ok\u{fffd}");
    }
}
