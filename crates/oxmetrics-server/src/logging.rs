use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `level` is the base directive for the
/// workspace crates; `RUST_LOG` can still refine it.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("oxmetrics_server={level}").parse()?)
        .add_directive(format!("oxmetrics_storage={level}").parse()?)
        .add_directive(format!("oxmetrics_common={level}").parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

/// 16 hex chars from 8 random bytes.
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

fn header_str<'a>(req: &'a Request<Body>, name: header::HeaderName) -> &'a str {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

/// Request/response logging middleware. Bodies are not logged: they are
/// usually compressed or encrypted at this layer.
///
/// Everything logged while the request is handled, rejections included,
/// runs inside a `request` span carrying the trace id.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!("request", trace_id = %trace_id);

    span.in_scope(|| {
        tracing::info!(
            method = %req.method(),
            path = %req.uri(),
            encoding = %header_str(&req, header::CONTENT_ENCODING),
            length = %header_str(&req, header::CONTENT_LENGTH),
            ua = %header_str(&req, header::USER_AGENT),
            "--> request"
        )
    });

    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());
    let status = response.status().as_u16();

    span.in_scope(|| match status {
        500.. => tracing::error!(status, elapsed = %elapsed, "<-- response"),
        400..=499 => tracing::warn!(status, elapsed = %elapsed, "<-- response"),
        _ => tracing::info!(status, elapsed = %elapsed, "<-- response"),
    });

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert("X-Trace-Id", val);
    }
    response
}
