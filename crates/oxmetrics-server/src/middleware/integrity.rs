use super::buffer;
use crate::error::IngestError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use oxmetrics_common::HASH_METADATA;

fn hash_header() -> HeaderName {
    HeaderName::from_static(HASH_METADATA)
}

/// Verifies the `HashSHA256` header against the body as received after
/// decryption. A server without a key, or a request without the header,
/// skips the check.
pub async fn verify_request(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    if !state.hasher.enabled() {
        return Ok(next.run(req).await);
    }
    // A header that is not valid text can never match, so it is kept as "".
    let Some(tag) = req
        .headers()
        .get(hash_header())
        .map(|v| std::str::from_utf8(v.as_bytes()).unwrap_or_default().to_string())
    else {
        return Ok(next.run(req).await);
    };

    let (parts, body) = req.into_parts();
    let bytes = buffer(body).await?;
    if !state.hasher.verify(&bytes, &tag) {
        tracing::warn!(len = bytes.len(), "Integrity check failed");
        return Err(IngestError::Integrity);
    }
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}

/// Tags the response body, before any compression, with `HashSHA256`.
pub async fn sign_response(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    let response = next.run(req).await;
    if !state.hasher.enabled() {
        return Ok(response);
    }
    let (mut parts, body) = response.into_parts();
    let bytes = buffer(body).await?;
    let tag = state.hasher.hash(&bytes);
    if let Ok(value) = HeaderValue::from_str(&tag) {
        parts.headers.insert(hash_header(), value);
    }
    Ok(Response::from_parts(parts, Body::from(bytes)))
}
