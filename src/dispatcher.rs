//! Fan-out dispatcher running many requests concurrently under a per-batch limit

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::FetchClient;
use crate::config::Config;
use crate::error::Result;
use crate::limiter::ConcurrencyLimiter;
use crate::transport::Transport;
use crate::types::{Request, Response};

/// Aggregate counts for a finished batch, used for logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Responses carrying a payload
    pub succeeded: usize,
    /// Responses with an error status from the remote
    pub rejected: usize,
    /// Responses with status 0 (transport failure, cancellation, internal fault)
    pub failed: usize,
}

impl BatchSummary {
    /// Tally a batch of responses
    pub fn from_responses(responses: &[Response]) -> Self {
        responses
            .iter()
            .fold(BatchSummary::default(), |mut summary, response| {
                if response.is_success() {
                    summary.succeeded += 1;
                } else if response.is_transport_failure() {
                    summary.failed += 1;
                } else {
                    summary.rejected += 1;
                }
                summary
            })
    }
}

/// Fetch many requests concurrently with a limit on in-flight requests
///
/// Every batch gets its own [`ConcurrencyLimiter`], so limits never leak between
/// unrelated batches. The pooled connection limit of the underlying
/// [`FetchClient`] still applies across batches.
#[derive(Clone)]
pub struct Dispatcher {
    client: FetchClient,
    max_concurrent: usize,
}

impl Dispatcher {
    /// Create a dispatcher with its own client over `transport`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the configuration is invalid.
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Result<Self> {
        let client = FetchClient::new(transport, config)?;
        Ok(Self::with_client(
            client,
            config.fetch.max_concurrent_requests,
        ))
    }

    /// Create a dispatcher around an existing client
    pub fn with_client(client: FetchClient, max_concurrent: usize) -> Self {
        Self {
            client,
            max_concurrent: max_concurrent.clamp(1, tokio::sync::Semaphore::MAX_PERMITS),
        }
    }

    /// The client every request goes through
    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// Per-batch concurrency limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// GET every URL, returning responses in the same order
    pub async fn fetch_urls<I, S>(&self, urls: I) -> Vec<Response>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetch_many(urls.into_iter().map(Request::get).collect())
            .await
    }

    /// Run every request and return exactly one response per request, in input order
    pub async fn fetch_many(&self, requests: Vec<Request>) -> Vec<Response> {
        self.fetch_many_with_cancel(requests, &CancellationToken::new())
            .await
    }

    /// Like [`fetch_many`](Self::fetch_many), stopping early once `cancel` fires
    ///
    /// Requests that have not finished when cancellation is observed yield a
    /// status-0 response; the batch still returns one response per request.
    ///
    /// Dropping the returned future aborts every request of the batch that is
    /// still running, releasing its pooled connection.
    pub async fn fetch_many_with_cancel(
        &self,
        requests: Vec<Request>,
        cancel: &CancellationToken,
    ) -> Vec<Response> {
        let total = requests.len();
        if total == 0 {
            return Vec::new();
        }

        let limiter = ConcurrencyLimiter::new(self.max_concurrent);
        tracing::debug!(
            requests = total,
            max_concurrent = limiter.capacity(),
            "Dispatching batch"
        );

        // Dropping the set aborts every unit still running
        let mut units = JoinSet::new();
        let mut slots = HashMap::with_capacity(total);
        for (index, request) in requests.into_iter().enumerate() {
            let limiter = limiter.clone();
            let client = self.client.clone();
            let cancel = cancel.clone();
            let handle = units.spawn(async move {
                run_unit(index, &request, &limiter, &client, &cancel).await
            });
            slots.insert(handle.id(), index);
        }

        let mut collected: Vec<Option<Response>> = vec![None; total];
        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((id, response)) => {
                    if let Some(&index) = slots.get(&id) {
                        collected[index] = Some(response);
                    }
                }
                Err(e) => {
                    if let Some(&index) = slots.get(&e.id()) {
                        tracing::error!(index, error = %e, "Dispatch unit failed");
                        collected[index] = Some(Response::transport_failure(format!(
                            "dispatch unit {index} failed: {e}"
                        )));
                    }
                }
            }
        }

        let responses: Vec<Response> = collected
            .into_iter()
            .enumerate()
            .map(|(index, response)| {
                response.unwrap_or_else(|| {
                    Response::transport_failure(format!("dispatch unit {index} did not report"))
                })
            })
            .collect();

        let summary = BatchSummary::from_responses(&responses);
        tracing::info!(
            requests = total,
            succeeded = summary.succeeded,
            rejected = summary.rejected,
            failed = summary.failed,
            "Batch complete"
        );

        responses
    }
}

/// One unit of a batch: take a slot, fetch, give the slot back
async fn run_unit(
    index: usize,
    request: &Request,
    limiter: &ConcurrencyLimiter,
    client: &FetchClient,
    cancel: &CancellationToken,
) -> Response {
    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Response::transport_failure(crate::client::CANCELLED_MESSAGE);
        }
        permit = limiter.acquire() => match permit {
            Ok(permit) => permit,
            Err(e) => return Response::transport_failure(e.to_string()),
        },
    };

    tracing::trace!(index, url = request.target(), "Slot acquired");
    let response = client.fetch_with_cancel(request, cancel).await;
    permit.release();
    response
}
