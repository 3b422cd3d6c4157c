use super::buffer;
use crate::error::IngestError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

/// Replaces an RSA-encrypted body with its plaintext. Without a configured
/// private key, or for an empty body, the request passes untouched.
pub async fn decrypt(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, IngestError> {
    let Some(decryptor) = state.decryptor.clone() else {
        return Ok(next.run(req).await);
    };

    let (mut parts, body) = req.into_parts();
    let sealed = buffer(body).await?;
    if sealed.is_empty() {
        return Ok(next.run(Request::from_parts(parts, Body::empty())).await);
    }

    let plain = tokio::task::spawn_blocking(move || decryptor.decrypt(&sealed))
        .await
        .map_err(|e| IngestError::Body(e.to_string()))??;
    parts.headers.remove(header::CONTENT_LENGTH);
    Ok(next.run(Request::from_parts(parts, Body::from(plain))).await)
}
