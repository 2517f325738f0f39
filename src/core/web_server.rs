//! HTTP API for metadata, downloads and progress.
//!
//! Routes:
//! - `POST /api/info`     → `{videoDetails, formats}`
//! - `POST /api/download` → chunked media body
//! - `POST /api/progress` → server-sent events, one JSON frame per tick
//! - `GET  /health`
//!
//! Input is validated before any process is spawned. Every spawned process
//! belongs to exactly one request and dies with it.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

use crate::core::config::GatewayConfig;
use crate::core::error::{AppError, AppResult};
use crate::core::validation::{validate_format_id, validate_media_url};
use crate::download::metadata::{MediaInfo, MetadataFetcher};
use crate::download::progress::ProgressRelay;
use crate::download::stream::{DownloadStreamer, FormatHint, ResponseMeta};
use crate::download::ytdlp::{QualityTier, YtDlp};

/// Shared, read-only per-process state.
#[derive(Clone)]
pub struct AppState {
    config: Arc<GatewayConfig>,
    metadata: Arc<MetadataFetcher>,
    downloads: Arc<DownloadStreamer>,
    progress: Arc<ProgressRelay>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let ytdlp = Arc::new(YtDlp::from_config(&config));
        Self {
            metadata: Arc::new(MetadataFetcher::new(ytdlp.clone(), config.limits.metadata_timeout())),
            downloads: Arc::new(DownloadStreamer::new(ytdlp.clone(), config.limits.download())),
            progress: Arc::new(ProgressRelay::new(ytdlp, config.limits.progress())),
            config: Arc::new(config),
        }
    }

    fn validate_url(&self, raw: &Option<String>) -> AppResult<Url> {
        let url = validate_media_url(required("url", raw)?, self.config.allowed_hosts.as_slice())?;
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: Option<String>,
    pub format_id: Option<String>,
    pub title: Option<String>,
    pub audio_only: Option<bool>,
    pub ext: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub url: Option<String>,
    #[serde(alias = "quality_tier")]
    pub quality: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/info", post(info_handler))
        .route("/api/download", post(download_handler))
        .route("/api/progress", post(progress_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn start_web_server(state: AppState, addr: SocketAddr) -> AppResult<()> {
    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Starting web server on http://{}", addr);
    tracing::info!("  POST /api/info      - Metadata (JSON)");
    tracing::info!("  POST /api/download  - Media stream");
    tracing::info!("  POST /api/progress  - Progress (SSE)");
    tracing::info!("  GET  /health        - Health check");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("Web server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => tracing::error!("Failed to install Ctrl-C handler: {}", e),
    }
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::InvalidBody(rejection.body_text()))
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::MissingField(field))
}

/// POST /api/info
async fn info_handler(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> AppResult<Json<MediaInfo>> {
    let request = parse_body(payload)?;
    let url = state.validate_url(&request.url)?;

    tracing::info!("Info request for {}", url);
    let info = state.metadata.fetch(&url).await?;
    Ok(Json(info))
}

/// POST /api/download
async fn download_handler(
    State(state): State<AppState>,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> AppResult<Response> {
    let request = parse_body(payload)?;
    let url = state.validate_url(&request.url)?;
    let format_id = validate_format_id(required("format_id", &request.format_id)?)?;

    let meta = ResponseMeta::for_format(
        format_id,
        &FormatHint {
            audio_only: request.audio_only,
            ext: request.ext.clone(),
            title: request.title.clone(),
        },
    );
    let disposition = HeaderValue::from_str(&meta.content_disposition())
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    tracing::info!(
        "Download request for {} [{}] as {} ({})",
        url,
        format_id,
        meta.filename,
        meta.content_type
    );

    let mut stream = state.downloads.start(&url, format_id).map_err(|e| {
        tracing::error!(subcategory = e.subcategory(), "Download could not start: {}", e);
        AppError::DownloadFailed
    })?;

    // Headers go out with the first chunk; earlier failures still get a status.
    stream.wait_for_output().await.map_err(|e| {
        tracing::warn!(subcategory = e.subcategory(), "Download failed before the first byte: {}", e);
        AppError::DownloadFailed
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(meta.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// POST /api/progress
async fn progress_handler(
    State(state): State<AppState>,
    payload: Result<Json<ProgressRequest>, JsonRejection>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let request = parse_body(payload)?;
    let url = state.validate_url(&request.url)?;
    let tier = QualityTier::parse(required("quality", &request.quality)?);

    tracing::info!("Progress request for {} [{}]", url, tier.label());

    let events = state
        .progress
        .start(&url, tier)
        .map(|event| Event::default().json_data(event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /health
async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_field() {
        assert_eq!(required("url", &Some(" x ".to_string())).unwrap(), "x");
        assert!(matches!(required("url", &None), Err(AppError::MissingField("url"))));
        assert!(matches!(
            required("format_id", &Some("   ".to_string())),
            Err(AppError::MissingField("format_id"))
        ));
    }

    #[test]
    fn test_progress_request_accepts_quality_tier_alias() {
        let request: ProgressRequest =
            serde_json::from_str(r#"{"url": "https://youtu.be/x", "quality_tier": "720p"}"#).unwrap();
        assert_eq!(request.quality.as_deref(), Some("720p"));
    }
}
