//! Common test utilities for fetch-dispatch integration tests

#[allow(dead_code)]
pub mod transport;

#[allow(unused_imports)]
pub use transport::*;

use fetch_dispatch::{Config, FetchConfig, RetryConfig};
use std::time::Duration;

/// Configuration with millisecond backoff so retry tests stay fast
#[allow(dead_code)]
pub fn fast_config(max_concurrent_requests: usize, max_retries: u32) -> Config {
    Config {
        fetch: FetchConfig {
            max_concurrent_requests,
            timeout: Duration::from_secs(5),
            ..FetchConfig::default()
        },
        retry: RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(2),
            backoff_multiplier: 2,
        },
        ..Config::default()
    }
}
