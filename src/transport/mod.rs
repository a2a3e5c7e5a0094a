//! HTTP transport for webhook calls.
//!
//! One pooled [`reqwest::Client`] is shared by every invocation; each attempt owns
//! its request and response buffers.

pub mod http;
pub mod retry;

pub use http::{AttemptError, HttpReply, HttpTransport, PreparedRequest, RequestBody};
pub use retry::{Decision, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
