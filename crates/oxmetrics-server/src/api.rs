//! HTTP handlers for the ingest and query routes.

use crate::error::{IngestError, Result};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use oxmetrics_common::codec;
use oxmetrics_common::types::MetricValue;
use std::fmt::Write;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const HTML: &str = "text/html; charset=utf-8";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_html))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(updates_json))
        .route("/value/", post(value_json))
        .route("/update/:kind", any(missing_name))
        .route("/update/:kind/", any(missing_name))
        .route("/update/:kind/:name/:value", post(update_text))
        .route("/value/:kind/:name", get(value_text))
        .fallback(unknown_route)
}

fn json(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, JSON)], body).into_response()
}

async fn update_json(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    Ok(json(state.controller.update_json(&body).await?))
}

async fn updates_json(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    Ok(json(state.controller.updates_json(&body).await?))
}

async fn value_json(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    Ok(json(state.controller.value_json(&body).await?))
}

async fn update_text(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<Response> {
    state.controller.update_text(&kind, &name, &value).await?;
    Ok(([(header::CONTENT_TYPE, TEXT)], "").into_response())
}

async fn value_text(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response> {
    let text = state.controller.value_text(&kind, &name).await?;
    Ok(([(header::CONTENT_TYPE, TEXT)], text).into_response())
}

async fn ping(State(state): State<AppState>) -> Result<StatusCode> {
    state.controller.check().await?;
    Ok(StatusCode::OK)
}

async fn missing_name() -> IngestError {
    IngestError::MissingName
}

async fn unknown_route() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "unknown route")
}

async fn list_html(State(state): State<AppState>) -> Response {
    let store = state.store();
    let mut gauges: Vec<(String, f64)> = store.list_gauges().await.into_iter().collect();
    let mut counters: Vec<(String, i64)> = store.list_counters().await.into_iter().collect();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    counters.sort_by(|a, b| a.0.cmp(&b.0));

    let mut page = String::from("<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body>\n");
    render_table(
        &mut page,
        "Gauges",
        gauges
            .iter()
            .map(|(id, v)| (id.as_str(), codec::format_value(&MetricValue::Gauge(*v)))),
    );
    render_table(
        &mut page,
        "Counters",
        counters.iter().map(|(id, v)| (id.as_str(), v.to_string())),
    );
    page.push_str("</body></html>\n");
    ([(header::CONTENT_TYPE, HTML)], page).into_response()
}

fn render_table<'a>(page: &mut String, title: &str, rows: impl Iterator<Item = (&'a str, String)>) {
    let _ = write!(page, "<h2>{title}</h2>\n<table>\n<tr><th>Name</th><th>Value</th></tr>\n");
    for (id, value) in rows {
        let _ = writeln!(page, "<tr><td>{}</td><td>{}</td></tr>", escape(id), value);
    }
    page.push_str("</table>\n");
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
