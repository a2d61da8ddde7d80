//! Resilient HTTP transport: backoff policy and retrying executor.

mod backoff;
mod fetch;

pub use backoff::{BackoffPolicy, DEFAULT_MAX_ATTEMPTS};
pub use fetch::{ApiRequest, Connectivity, FetchError, ResilientFetch};
