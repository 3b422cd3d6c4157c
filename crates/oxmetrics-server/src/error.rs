use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use oxmetrics_common::error::{CipherError, CodecError, InflateError};
use oxmetrics_common::types::MetricKind;
use oxmetrics_storage::error::StorageError;

/// Every way an ingest or query request can fail, with its HTTP and gRPC
/// status.
///
/// # Examples
///
/// ```rust
/// use axum::http::StatusCode;
/// use oxmetrics_server::error::IngestError;
///
/// let err = IngestError::Forbidden("10.0.1.5".into());
/// assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
/// assert_eq!(tonic::Status::from(err).code(), tonic::Code::Unavailable);
/// ```
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The client sent a metric that does not validate.
    #[error("Ingest: invalid metric: {0}")]
    Validation(#[from] CodecError),

    /// The queried metric does not exist.
    #[error("Ingest: {kind} {id:?} not found")]
    NotFound { kind: MetricKind, id: String },

    /// The request names a metric type without a name.
    #[error("Ingest: metric name is required")]
    MissingName,

    /// The HMAC header does not match the body.
    #[error("Ingest: integrity check failed")]
    Integrity,

    /// The body could not be decrypted with the server key.
    #[error("Ingest: decryption failed: {0}")]
    Decrypt(#[from] CipherError),

    /// The advertised source address is missing or outside the trusted subnet.
    #[error("Ingest: source address rejected: {0}")]
    Forbidden(String),

    /// The body is not valid gzip.
    #[error("Ingest: gzip error: {0}")]
    Gzip(std::io::Error),

    /// The inflated body is larger than the server accepts.
    #[error("Ingest: body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// The body could not be read or the response could not be rendered.
    #[error("Ingest: body error: {0}")]
    Body(String),

    /// The persister failed.
    #[error("Ingest: storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    pub fn not_found(kind: MetricKind, id: impl Into<String>) -> Self {
        IngestError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IngestError::Validation(_) | IngestError::Integrity | IngestError::Decrypt(_) => {
                StatusCode::BAD_REQUEST
            }
            IngestError::NotFound { .. } | IngestError::MissingName => StatusCode::NOT_FOUND,
            IngestError::Forbidden(_) => StatusCode::FORBIDDEN,
            IngestError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IngestError::Gzip(_) | IngestError::Body(_) | IngestError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<IngestError> for tonic::Status {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::Validation(_)
            | IngestError::Integrity
            | IngestError::Decrypt(_)
            | IngestError::MissingName => tonic::Status::invalid_argument(message),
            IngestError::NotFound { .. } => tonic::Status::not_found(message),
            IngestError::TooLarge { .. } => tonic::Status::resource_exhausted(message),
            IngestError::Forbidden(_) | IngestError::Storage(_) => {
                tonic::Status::unavailable(message)
            }
            IngestError::Gzip(_) | IngestError::Body(_) => tonic::Status::internal(message),
        }
    }
}

impl From<InflateError> for IngestError {
    fn from(err: InflateError) -> Self {
        match err {
            InflateError::Io(e) => IngestError::Gzip(e),
            InflateError::TooLarge { limit } => IngestError::TooLarge { limit },
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
