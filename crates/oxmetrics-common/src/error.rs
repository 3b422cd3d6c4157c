/// Validation failures raised while decoding metrics from any wire form.
///
/// # Examples
///
/// ```rust
/// use oxmetrics_common::error::CodecError;
///
/// let err = CodecError::MissingValue { id: "temp".to_string(), kind: "gauge" };
/// assert!(err.to_string().contains("temp"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not well-formed JSON or has the wrong shape.
    #[error("Codec: malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Codec: metric id is empty")]
    EmptyId,

    #[error("Codec: unknown metric type '{0}'")]
    UnknownType(String),

    /// The field matching the metric type (`delta` or `value`) is absent.
    #[error("Codec: {kind} '{id}' has no value")]
    MissingValue { id: String, kind: &'static str },

    /// Both `delta` and `value` were supplied.
    #[error("Codec: metric '{id}' sets both delta and value")]
    ConflictingValues { id: String },

    /// A textual value could not be parsed as the metric's numeric type.
    #[error("Codec: invalid {kind} value '{raw}'")]
    BadValue { raw: String, kind: &'static str },

    /// One element of a batch failed; the whole batch is rejected.
    #[error("Codec: batch element {index}: {source}")]
    BatchElement {
        index: usize,
        #[source]
        source: Box<CodecError>,
    },
}

/// Failures of the asymmetric payload cipher.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("Cipher: cannot read key material: {0}")]
    Io(#[from] std::io::Error),

    /// The PEM block is missing, has an unexpected tag, or holds a malformed key.
    #[error("Cipher: invalid key: {0}")]
    InvalidKey(String),

    #[error("Cipher: RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    /// Ciphertext length is not a multiple of the key size.
    #[error("Cipher: ciphertext of {len} bytes is not a multiple of the {block} byte block")]
    Misaligned { len: usize, block: usize },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Failures while inflating a gzip body under a size limit.
#[derive(Debug, thiserror::Error)]
pub enum InflateError {
    /// The input is not valid gzip.
    #[error("Gzip: {0}")]
    Io(#[from] std::io::Error),

    #[error("Gzip: inflated body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}
