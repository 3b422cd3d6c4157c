//! Shared building blocks for the oxmetrics agent and server: the metric
//! model and its wire forms, payload gzip, HMAC tagging, RSA payload
//! encryption, the retry policy, the periodic ticker, interval parsing and
//! signal-driven shutdown.

pub mod cipher;
pub mod codec;
pub mod duration;
pub mod error;
pub mod grpc;
pub mod gzip;
pub mod hashing;
pub mod retry;
pub mod shutdown;
pub mod ticker;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("proto_metrics");
}

/// HTTP header carrying the hex HMAC of the body.
pub const HASH_HEADER: &str = "HashSHA256";
/// gRPC metadata key carrying the hex HMAC of the sent messages.
pub const HASH_METADATA: &str = "hashsha256";
/// HTTP header advertising the sender's IP for the trusted-subnet gate.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
/// gRPC metadata key advertising the sender's IP.
pub const REAL_IP_METADATA: &str = "x-real-ip";
