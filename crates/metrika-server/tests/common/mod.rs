#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use metrika_server::app;
use metrika_server::config::ServerConfig;
use metrika_server::state::AppState;
use metrika_storage::memory::MemStorage;
use metrika_storage::Storage;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub store: Option<Arc<MemStorage>>,
    pub app: axum::Router,
}

fn test_config(temp_dir: &TempDir) -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".to_string(),
        file_storage_path: temp_dir
            .path()
            .join("metrics.json")
            .to_string_lossy()
            .to_string(),
        ..ServerConfig::default()
    }
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_| {})
}

/// Context backed by an in-memory store; `configure` adjusts the server
/// settings (key, trusted subnet) before the state is built.
pub fn build_test_context_with<F>(configure: F) -> Result<TestContext>
where
    F: FnOnce(&mut ServerConfig),
{
    let temp_dir = tempfile::tempdir()?;
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let store = Arc::new(MemStorage::new());
    let storage: Arc<dyn Storage> = store.clone();
    let state = AppState::new(config, Some(storage))?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        store: Some(store),
        app,
    })
}

/// Context whose store failed to initialize.
pub fn build_storeless_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let config = test_config(&temp_dir);
    let state = AppState::new(config, None)?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        store: None,
        app,
    })
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

    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("response should be JSON")
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
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

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Vec<u8>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder
        .body(Body::from(body))
        .expect("request should build");
    send(app, req).await
}

pub async fn post_json(app: &axum::Router, uri: &str, body: Value) -> TestResponse {
    request_raw(
        app,
        "POST",
        uri,
        &[("Content-Type", "application/json")],
        body.to_string().into_bytes(),
    )
    .await
}

pub async fn post_empty(app: &axum::Router, uri: &str) -> TestResponse {
    request_raw(app, "POST", uri, &[], Vec::new()).await
}

pub async fn get(app: &axum::Router, uri: &str) -> TestResponse {
    request_raw(app, "GET", uri, &[], Vec::new()).await
}
