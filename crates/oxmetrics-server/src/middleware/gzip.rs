use super::{buffer, header_contains, MAX_BODY_BYTES};
use crate::error::IngestError;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use oxmetrics_common::gzip;

/// Inflates gzip request bodies and deflates successful responses for
/// clients that accept gzip and ask for a compressible content type.
pub async fn gzip(req: Request, next: Next) -> Result<Response, IngestError> {
    let accepts_gzip = header_contains(req.headers(), header::ACCEPT_ENCODING, "gzip");
    let compressible = [header::ACCEPT, header::CONTENT_TYPE].into_iter().any(|name| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(gzip::is_compressible)
    });

    let req = if header_contains(req.headers(), header::CONTENT_ENCODING, "gzip") {
        let (mut parts, body) = req.into_parts();
        let packed = buffer(body).await?;
        let plain = gzip::decompress_limited(&packed, MAX_BODY_BYTES)?;
        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        Request::from_parts(parts, Body::from(plain))
    } else {
        req
    };

    let response = next.run(req).await;
    if !accepts_gzip || !compressible || response.status().as_u16() >= 300 {
        return Ok(response);
    }

    let (mut parts, body) = response.into_parts();
    let bytes = buffer(body).await?;
    let packed = gzip::compress(&bytes).map_err(IngestError::Gzip)?;
    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(Response::from_parts(parts, Body::from(packed)))
}
