pub mod backoff;

pub use backoff::{RetryPolicy, DEFAULT_RETRY_INTERVAL};
