#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use oxmetrics_server::app;
use oxmetrics_server::config::ServerConfig;
use oxmetrics_server::state::AppState;
use oxmetrics_storage::memory::MetricStore;
use oxmetrics_storage::Persister;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Config pointing all file paths into `dir`, with restore off.
pub fn test_config(dir: &TempDir) -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".to_string(),
        file_storage_path: Some(dir.path().join("metrics.json")),
        restore: false,
        ..Default::default()
    }
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_, _| {}, None)
}

/// Builds the router over a fresh store. `tweak` adjusts the config, and may
/// place files in the context's temp dir, before the state is built.
pub fn build_test_context_with(
    tweak: impl FnOnce(&mut ServerConfig, &TempDir),
    persister: Option<Arc<dyn Persister>>,
) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let mut config = test_config(&temp_dir);
    tweak(&mut config, &temp_dir);

    let store = Arc::new(MetricStore::new(persister));
    let state = AppState::new(config, store)?;
    let app = app::build_http_app(state.clone());
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");
    send(app, req).await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "GET", uri, &[], Body::empty()).await
}

pub async fn post(app: &axum::Router, uri: &str) -> TestResponse {
    request(app, "POST", uri, &[], Body::empty()).await
}

pub async fn post_json(app: &axum::Router, uri: &str, json: &str) -> TestResponse {
    request(
        app,
        "POST",
        uri,
        &[("Content-Type", "application/json")],
        json.to_string(),
    )
    .await
}

/// One RSA key for the whole test binary; generation is slow.
pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation"))
}

/// Writes the test private key as PKCS#1 PEM into `dir`.
pub fn write_private_key(dir: &TempDir) -> Result<std::path::PathBuf> {
    let path = dir.path().join("private.pem");
    let pem = test_key().to_pkcs1_pem(LineEnding::LF)?;
    std::fs::write(&path, pem.as_bytes())?;
    Ok(path)
}
