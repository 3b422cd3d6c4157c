//! The HTTP request pipeline, outermost first: [`ip_gate`], [`decrypt`],
//! [`integrity::verify_request`], [`gzip`], [`integrity::sign_response`].
//!
//! Each step buffers the body it needs and hands the next step a fresh one.

pub mod decrypt;
pub mod gzip;
pub mod integrity;
pub mod ip_gate;

use crate::error::IngestError;
use axum::body::{Body, Bytes};
use axum::http::HeaderMap;

pub use decrypt::decrypt;
pub use gzip::gzip;
pub use ip_gate::ip_gate;

/// Upper bound on any buffered request or response body, compressed or
/// inflated, and on what handlers extract.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub(crate) async fn buffer(body: Body) -> Result<Bytes, IngestError> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| IngestError::Body(e.to_string()))
}

pub(crate) fn header_contains(headers: &HeaderMap, name: axum::http::HeaderName, needle: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(needle))
}
