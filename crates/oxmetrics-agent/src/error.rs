use oxmetrics_common::error::{CipherError, CodecError};
use std::time::Duration;

/// Worker pool construction and submission errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool: worker count must be at least 1")]
    NoWorkers,

    #[error("Pool: the pool is shut down")]
    Closed,
}

/// Failure to deliver one batch to the server.
///
/// [`DispatchError::is_retryable`] separates transient failures, which the
/// dispatcher retries on its schedule, from everything else.
///
/// # Examples
///
/// ```rust
/// use oxmetrics_agent::error::DispatchError;
///
/// assert!(DispatchError::Status { status: 503, body: String::new() }.is_retryable());
/// assert!(!DispatchError::Status { status: 400, body: String::new() }.is_retryable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Dispatch: encoding failed: {0}")]
    Encode(#[from] CodecError),

    #[error("Dispatch: compression failed: {0}")]
    Compress(std::io::Error),

    #[error("Dispatch: encryption failed: {0}")]
    Encrypt(#[from] CipherError),

    #[error("Dispatch: request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dispatch: server answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Dispatch: response signature mismatch")]
    Integrity,

    #[error("Dispatch: gRPC call failed: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Dispatch: gRPC endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    #[error("Dispatch: attempt {attempt} timed out after {deadline:?}")]
    TimedOut { attempt: usize, deadline: Duration },
}

impl DispatchError {
    /// Network failures and transient server answers.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            DispatchError::Status { status, .. } => *status == 429 || *status >= 500,
            DispatchError::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable
                    | tonic::Code::DeadlineExceeded
                    | tonic::Code::ResourceExhausted
                    | tonic::Code::Aborted
            ),
            DispatchError::TimedOut { .. } => true,
            _ => false,
        }
    }
}
