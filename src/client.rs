//! Bounded fetch client performing one logical request with retry, timeout and a pooled connection

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FetchConfig};
use crate::error::{Result, RetryError, TransportError};
use crate::retry::{BackoffPolicy, retry_with_backoff};
use crate::transport::{CallOptions, RawResponse, Transport};
use crate::types::{Payload, Request, Response};

/// Error message carried by responses to cancelled requests
pub const CANCELLED_MESSAGE: &str = "request cancelled";

/// Async request client with connection pooling, retries, and error handling
///
/// Cloning is cheap and clones share the same transport and connection pool.
///
/// Outcomes never escape as errors:
/// - status < 400: the body is decoded (JSON when declared, otherwise text)
/// - status >= 400: returned at once with the body as error, never retried
/// - transport fault: retried with exponential backoff, then status 0
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    /// Connection pool capacity, held for the whole logical request
    connections: Arc<Semaphore>,
    config: Arc<FetchConfig>,
    policy: BackoffPolicy,
}

impl FetchClient {
    /// Create a client over `transport`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is invalid.
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            connections: Arc::new(Semaphore::new(config.fetch.max_connections)),
            config: Arc::new(config.fetch.clone()),
            policy: config.retry.policy(),
        })
    }

    /// GET `url` with the default retry budget
    pub async fn get(&self, url: &str) -> Response {
        self.fetch(&Request::get(url)).await
    }

    /// POST a JSON payload to `url` with the default retry budget
    pub async fn post(&self, url: &str, payload: serde_json::Value) -> Response {
        self.fetch(&Request::post(url, payload)).await
    }

    /// Perform one logical request
    pub async fn fetch(&self, request: &Request) -> Response {
        self.fetch_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Perform one logical request, giving up early once `cancel` fires
    ///
    /// Cancellation is observed at every suspension point: while waiting for a
    /// pooled connection, during a transport call and during backoff sleeps.
    /// A cancelled request yields a status-0 response carrying [`CANCELLED_MESSAGE`].
    pub async fn fetch_with_cancel(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Response {
        let timeout = request.timeout().unwrap_or(self.config.timeout);
        let policy = match request.retries() {
            Some(retries) => self.policy.with_max_attempts(retries.saturating_add(1)),
            None => self.policy,
        };

        // Released on drop, whichever way this function returns
        let _connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Response::transport_failure(CANCELLED_MESSAGE);
            }
            permit = self.connections.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Response::transport_failure("connection pool closed"),
            },
        };

        tracing::debug!(
            url = request.target(),
            method = %request.method(),
            max_attempts = policy.max_attempts(),
            timeout_ms = timeout.as_millis(),
            "Sending request"
        );

        let options = CallOptions {
            payload: request.payload().cloned(),
            timeout,
        };

        let retried = retry_with_backoff(&policy, cancel, |_attempt| {
            self.attempt(request, &options)
        });

        // An in-flight attempt is dropped as soon as cancellation is requested
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RetryError::Cancelled { attempts: 0 }),
            result = retried => result,
        };

        match result {
            Ok(response) => response,
            Err(RetryError::Cancelled { .. }) => {
                tracing::debug!(url = request.target(), "Request cancelled");
                Response::transport_failure(CANCELLED_MESSAGE)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::warn!(
                    url = request.target(),
                    attempts,
                    error = %last,
                    "Request failed"
                );
                Response::transport_failure(last.to_string())
            }
            Err(RetryError::Permanent(e)) => Response::transport_failure(e.to_string()),
        }
    }

    /// Number of pooled connections currently held by in-flight requests
    pub fn connections_in_use(&self) -> usize {
        self.config
            .max_connections
            .saturating_sub(self.connections.available_permits())
    }

    /// Default per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// One transport call under its own timeout
    async fn attempt(
        &self,
        request: &Request,
        options: &CallOptions,
    ) -> std::result::Result<Response, TransportError> {
        let call = self
            .transport
            .call(request.method(), request.target(), options);

        let raw = match tokio::time::timeout(options.timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(options.timeout)),
        };

        if raw.status < 400 {
            decode_success(raw)
        } else {
            tracing::debug!(
                url = request.target(),
                status = raw.status,
                "Request rejected by remote"
            );
            Ok(Response::rejected(raw.status, raw.text_body()))
        }
    }
}

/// Decode a successful body according to its declared content type
fn decode_success(raw: RawResponse) -> std::result::Result<Response, TransportError> {
    let payload = if raw.is_json() {
        let value = serde_json::from_slice(&raw.body)
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        Payload::Json(value)
    } else {
        Payload::Text(raw.text_body())
    };
    Ok(Response::success(raw.status, payload))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::types::Method;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays a scripted sequence of outcomes, counting calls
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<std::result::Result<RawResponse, TransportError>>>,
        calls: AtomicU32,
        /// Delay before answering each call
        latency: Duration,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<std::result::Result<RawResponse, TransportError>>) -> Self {
            Self {
                outcomes: Mutex::new(VecDeque::from(outcomes)),
                calls: AtomicU32::new(0),
                latency: Duration::ZERO,
            }
        }

        fn slow(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::new(vec![])
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Transport for ScriptedTransport {
        async fn call(
            &self,
            _method: Method,
            _target: &str,
            _options: &CallOptions,
        ) -> std::result::Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Other("no more scripted outcomes".into())))
        }
    }

    fn fast_config(max_retries: u32) -> Config {
        Config {
            retry: RetryConfig {
                max_retries,
                initial_delay: Duration::from_millis(5),
                backoff_multiplier: 2,
            },
            ..Config::default()
        }
    }

    fn client(transport: &Arc<ScriptedTransport>, config: &Config) -> FetchClient {
        FetchClient::new(transport.clone(), config).unwrap()
    }

    #[tokio::test]
    async fn json_success_is_decoded() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::json(
            200,
            &json!({"id": 1}),
        ))]));

        let response = client(&transport, &fast_config(3)).get("https://a/1").await;

        assert_eq!(response.status(), 200);
        assert_eq!(response.data(), Some(&Payload::Json(json!({"id": 1}))));
        assert!(response.error().is_none());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn non_json_success_is_text() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::text(
            204, "done",
        ))]));

        let response = client(&transport, &fast_config(3)).get("https://a/1").await;

        assert_eq!(response.status(), 204);
        assert_eq!(response.data().and_then(Payload::as_text), Some("done"));
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::text(500, "internal error")),
            Ok(RawResponse::text(200, "should never be reached")),
        ]));

        let response = client(&transport, &fast_config(3)).get("https://a/1").await;

        assert_eq!(response.status(), 500);
        assert_eq!(response.error(), Some("internal error"));
        assert!(response.data().is_none());
        assert_eq!(transport.calls(), 1, "status >= 400 must not be retried");
    }

    #[tokio::test]
    async fn transient_fault_then_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connect("connection reset".into())),
            Ok(RawResponse::text(200, "ok")),
        ]));

        let response = client(&transport, &fast_config(3)).get("https://a/1").await;

        assert_eq!(response.status(), 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn timeout_on_every_attempt_exhausts_budget() {
        let transport = Arc::new(ScriptedTransport::slow(Duration::from_secs(10)));
        let request = Request::get("https://slow").with_timeout(Duration::from_millis(10));

        let response = client(&transport, &fast_config(3)).fetch(&request).await;

        assert_eq!(response.status(), 0);
        assert_eq!(transport.calls(), 4, "R=3 means 4 total attempts");
        assert_eq!(response.error(), Some("request timed out after 10ms"));
    }

    #[tokio::test]
    async fn exhausted_response_carries_last_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".into())),
            Err(TransportError::Protocol("bad frame".into())),
        ]));

        let response = client(&transport, &fast_config(1)).get("https://a/1").await;

        assert_eq!(response.status(), 0);
        assert_eq!(response.error(), Some("protocol error: bad frame"));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn per_request_retry_override() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let request = Request::get("https://a/1").with_retries(0);

        let response = client(&transport, &fast_config(5)).fetch(&request).await;

        assert!(response.is_transport_failure());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_json_is_retried_as_transient() {
        let bad = RawResponse {
            status: 200,
            content_type: Some("application/json".into()),
            body: b"{not json".to_vec(),
        };
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(bad),
            Ok(RawResponse::json(200, &json!([1, 2]))),
        ]));

        let response = client(&transport, &fast_config(3)).get("https://a/1").await;

        assert_eq!(response.data(), Some(&Payload::Json(json!([1, 2]))));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn post_sends_payload() {
        struct EchoTransport;

        #[async_trait::async_trait]
        impl Transport for EchoTransport {
            async fn call(
                &self,
                method: Method,
                _target: &str,
                options: &CallOptions,
            ) -> std::result::Result<RawResponse, TransportError> {
                Ok(RawResponse::json(
                    201,
                    &json!({"method": method.as_str(), "echo": options.payload}),
                ))
            }
        }

        let client = FetchClient::new(Arc::new(EchoTransport), &Config::default()).unwrap();
        let response = client.post("https://a/items", json!({"name": "x"})).await;

        assert_eq!(response.status(), 201);
        assert_eq!(
            response.data().and_then(Payload::as_json),
            Some(&json!({"method": "POST", "echo": {"name": "x"}}))
        );
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(RawResponse::text(200, "x"))]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = client(&transport, &fast_config(3))
            .fetch_with_cancel(&Request::get("https://a/1"), &cancel)
            .await;

        assert_eq!(response.status(), 0);
        assert_eq!(response.error(), Some(CANCELLED_MESSAGE));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn connection_released_on_every_exit_path() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(RawResponse::text(200, "ok")),
            Ok(RawResponse::text(404, "missing")),
        ]));
        let config = Config {
            fetch: FetchConfig {
                max_connections: 1,
                ..FetchConfig::default()
            },
            ..fast_config(0)
        };
        let client = client(&transport, &config);

        assert_eq!(client.get("https://a/1").await.status(), 200);
        assert_eq!(client.connections_in_use(), 0);
        assert_eq!(client.get("https://a/2").await.status(), 404);
        assert_eq!(client.connections_in_use(), 0);
        // Scripted outcomes exhausted: transport fault path
        assert_eq!(client.get("https://a/3").await.status(), 0);
        assert_eq!(client.connections_in_use(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::new(vec![]));
        let config = Config {
            fetch: FetchConfig {
                max_connections: 0,
                ..FetchConfig::default()
            },
            ..Config::default()
        };
        assert!(FetchClient::new(transport, &config).is_err());
    }
}
