//! # fetch-dispatch
//!
//! Bounded-concurrency, retrying request dispatch and background task lifecycle
//! management on Tokio.
//!
//! ## Design Philosophy
//!
//! - **Failures are data** - a batch of N requests always yields N responses in
//!   input order; a failed task is a state, not a propagated error
//! - **Transport-agnostic** - the network is reached through the [`Transport`] trait
//! - **Cooperative cancellation** - every unit of work carries a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken)
//! - **No hidden globals** - dispatchers and task managers are values owned by the caller
//!
//! ## Quick Start
//!
//! ```no_run
//! use fetch_dispatch::{
//!     CallOptions, Config, Dispatcher, Method, RawResponse, TaskManager, Transport,
//!     TransportError,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct MyTransport;
//!
//! #[async_trait::async_trait]
//! impl Transport for MyTransport {
//!     async fn call(
//!         &self,
//!         _method: Method,
//!         target: &str,
//!         _options: &CallOptions,
//!     ) -> Result<RawResponse, TransportError> {
//!         Ok(RawResponse::text(200, format!("hello from {target}")))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(Arc::new(MyTransport), &Config::default())?;
//!
//!     let responses = dispatcher
//!         .fetch_urls(["https://example.com/1", "https://example.com/2"])
//!         .await;
//!     for (i, response) in responses.iter().enumerate() {
//!         println!("URL {}: Status {}", i + 1, response.status());
//!     }
//!
//!     let tasks = TaskManager::default();
//!     tasks.start("refresh", |cancel| async move {
//!         cancel.cancelled().await;
//!         Ok::<(), std::io::Error>(())
//!     });
//!     tasks.cancel("refresh");
//!     tasks.wait_for_all(Some(Duration::from_secs(5))).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bounded fetch client
pub mod client;
/// Configuration types
pub mod config;
/// Fan-out dispatcher
pub mod dispatcher;
/// Error types
pub mod error;
/// Concurrency limiter
pub mod limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Background task lifecycle manager
pub mod tasks;
/// Transport abstraction
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::FetchClient;
pub use config::{Config, FetchConfig, RetryConfig, TaskConfig};
pub use dispatcher::{BatchSummary, Dispatcher};
pub use error::{Error, Result, RetryError, TransportError};
pub use limiter::{ConcurrencyLimiter, Permit};
pub use retry::{BackoffPolicy, IsRetryable};
pub use tasks::TaskManager;
pub use transport::{CallOptions, RawResponse, Transport};
pub use types::{Method, Payload, Request, Response, TaskEvent, TaskOutcome, TaskState};

/// Wait for a termination signal, then shut the task manager down.
///
/// Returns the result of [`TaskManager::shutdown`]: `false` if some task was still
/// running when the configured shutdown timeout elapsed.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to `ctrl_c` if the
///   handlers cannot be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use fetch_dispatch::{TaskManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() {
///     let tasks = TaskManager::default();
///     tasks.start("heartbeat", |cancel| async move {
///         cancel.cancelled().await;
///         Ok::<(), std::io::Error>(())
///     });
///
///     run_with_shutdown(tasks).await;
/// }
/// ```
pub async fn run_with_shutdown(tasks: TaskManager) -> bool {
    wait_for_signal().await;
    tasks.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register one signal handler, waiting on the other");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
