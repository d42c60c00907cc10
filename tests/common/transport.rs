//! Mock transport keyed by target, with call counting and concurrency tracking

use async_trait::async_trait;
use fetch_dispatch::{CallOptions, Method, RawResponse, Transport, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How a target answers every call
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with this status and JSON body
    Json(u16, serde_json::Value),
    /// Answer with this status and text body
    Text(u16, String),
    /// Fail at the transport layer
    Fail(TransportError),
    /// Never answer
    Hang,
    /// Fail this many times with a connection error, then answer 200 with the text
    FlakyThen(usize, String),
}

/// Transport that answers according to a per-target [`Behavior`]
///
/// Unknown targets answer 404.
pub struct MockTransport {
    routes: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn route(mut self, target: &str, behavior: Behavior) -> Self {
        self.routes.insert(target.to_string(), behavior);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of calls made to `target`
    pub fn calls(&self, target: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(target)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of simultaneous calls observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call future is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(
        &self,
        _method: Method,
        target: &str,
        _options: &CallOptions,
    ) -> Result<RawResponse, TransportError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(target.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.routes.get(target) {
            Some(Behavior::Json(status, body)) => Ok(RawResponse::json(*status, body)),
            Some(Behavior::Text(status, body)) => Ok(RawResponse::text(*status, body.clone())),
            Some(Behavior::Fail(e)) => Err(e.clone()),
            Some(Behavior::Hang) => std::future::pending().await,
            Some(Behavior::FlakyThen(failures, body)) => {
                if call_number <= *failures {
                    Err(TransportError::Connect(format!("flaky call {call_number}")))
                } else {
                    Ok(RawResponse::text(200, body.clone()))
                }
            }
            None => Ok(RawResponse::text(404, "not found")),
        }
    }
}
