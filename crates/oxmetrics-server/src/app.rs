use crate::state::AppState;
use crate::{api, logging, middleware as mw};
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

/// Builds the HTTP router with the full middleware pipeline.
///
/// Layers added later wrap the ones added earlier, so requests traverse them
/// bottom-up: logging, body limit, IP gate, decryption, HMAC check, gzip,
/// and finally response signing right around the handlers.
pub fn build_http_app(state: AppState) -> Router {
    api::routes()
        .layer(DefaultBodyLimit::max(mw::MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::integrity::sign_response,
        ))
        .layer(middleware::from_fn(mw::gzip))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::integrity::verify_request,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), mw::decrypt))
        .layer(middleware::from_fn_with_state(state.clone(), mw::ip_gate))
        .layer(RequestBodyLimitLayer::new(mw::MAX_BODY_BYTES))
        .with_state(state)
        .layer(middleware::from_fn(logging::request_logging))
}
