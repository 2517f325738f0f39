//! Common test utilities
//!
//! Shared across integration tests: fake yt-dlp scripts, a router wired to
//! them, and request/response helpers.

#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tower::ServiceExt;

use mediagate::{router, AppState, GatewayConfig};

/// Executable `/bin/sh` script standing in for yt-dlp.
pub struct FakeTool {
    dir: TempDir,
    path: PathBuf,
}

impl FakeTool {
    pub fn new(body: &str) -> Self {
        Self::build(|_| body.to_string())
    }

    pub fn build(body: impl FnOnce(&Path) -> String) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("yt-dlp");
        let body = body(dir.path());

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{}", body).unwrap();
        file.sync_all().unwrap();
        drop(file);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    /// Script that touches `<dir>/invoked` before running `body`.
    pub fn recording(body: &str) -> Self {
        Self::build(|dir| format!("touch '{}/invoked'\n{}", dir.display(), body))
    }

    pub fn bin(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn was_invoked(&self) -> bool {
        self.dir.path().join("invoked").exists()
    }
}

/// Defaults with the given binary and caps small enough for tests.
pub fn test_config(bin: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.ytdlp_bin = bin.to_string();
    config.limits.max_download_bytes = 1_000_000;
    config.limits.max_download_secs = 5;
    config.limits.metadata_timeout_secs = 5;
    config.limits.progress_timeout_secs = 5;
    config.limits.socket_timeout_secs = 5;
    config
}

pub fn app(config: GatewayConfig) -> Router {
    router(AppState::new(config))
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// `data:` payloads of an SSE body, parsed as JSON.
pub fn sse_frames(body: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}
