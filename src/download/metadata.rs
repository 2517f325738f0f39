//! Metadata fetching via `yt-dlp --dump-json`.
//!
//! One bounded call per request. Every failure mode (spawn error, timeout,
//! nonzero exit, empty or malformed output, no usable formats) collapses to
//! [`AppError::MetadataUnavailable`]; the detail only goes to the log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::core::error::AppError;
use crate::download::formats::{normalize_formats, Format, RawFormat};
use crate::download::ytdlp::{Invocation, YtDlp};

/// Why a `--dump-json` payload was rejected. Logged, never returned to clients.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("yt-dlp produced no output")]
    Empty,
    #[error("malformed metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no downloadable formats")]
    NoFormats,
}

/// Top-level `--dump-json` document. Only the fields we read.
#[derive(Debug, Default, Deserialize)]
pub struct RawInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub view_count: Option<u64>,
    #[serde(default)]
    pub formats: Option<Vec<RawFormat>>,
    /// Single-format extractors describe their only rendition at top level.
    #[serde(flatten)]
    pub top_level: RawFormat,
}

/// Resource-level details shown alongside the format list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    pub author: Option<String>,
    pub view_count: Option<u64>,
    pub platform: &'static str,
}

/// Metadata endpoint response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    #[serde(rename = "videoDetails")]
    pub video_details: VideoDetails,
    pub formats: Vec<Format>,
}

/// Human-readable platform name derived from the URL host.
pub fn platform_name(url: &Url) -> &'static str {
    match url.host_str().map(|h| h.to_lowercase()).as_deref() {
        Some(h) if h.contains("youtube") || h.contains("youtu.be") => "YouTube",
        Some(h) if h.contains("instagram") => "Instagram",
        Some(h) if h.contains("tiktok") => "TikTok",
        Some(h) if h.contains("facebook") || h.contains("fb.watch") => "Facebook",
        Some(h) if h.contains("pinterest") || h.contains("pin.it") => "Pinterest",
        _ => "Web",
    }
}

/// Parses `--dump-json` stdout into the normalized response.
///
/// Only the first JSON document is read, whether it spans one line or many;
/// with `--no-playlist` yt-dlp prints exactly one, anything after it is ignored.
pub fn parse_media_info(stdout: &[u8], url: &Url) -> Result<MediaInfo, MetadataError> {
    let info: RawInfo = serde_json::Deserializer::from_slice(stdout)
        .into_iter::<RawInfo>()
        .next()
        .ok_or(MetadataError::Empty)??;

    let raw_formats = match info.formats {
        Some(list) if !list.is_empty() => list,
        _ => vec![info.top_level],
    };

    let formats = normalize_formats(&raw_formats, info.duration);
    if formats.is_empty() {
        return Err(MetadataError::NoFormats);
    }

    let title = info
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    Ok(MediaInfo {
        video_details: VideoDetails {
            title,
            thumbnail: info.thumbnail,
            duration: info.duration.filter(|d| d.is_finite() && *d >= 0.0),
            author: info.uploader.or(info.channel),
            view_count: info.view_count,
            platform: platform_name(url),
        },
        formats,
    })
}

/// Runs metadata dumps with a fixed wall-clock bound.
#[derive(Debug, Clone)]
pub struct MetadataFetcher {
    ytdlp: Arc<YtDlp>,
    timeout: Duration,
}

impl MetadataFetcher {
    pub fn new(ytdlp: Arc<YtDlp>, timeout: Duration) -> Self {
        Self { ytdlp, timeout }
    }

    /// Fetches and normalizes metadata for an already validated URL.
    pub async fn fetch(&self, url: &Url) -> Result<MediaInfo, AppError> {
        let output = self
            .ytdlp
            .run(&Invocation::DumpMetadata { url }, self.timeout)
            .await
            .map_err(|e| {
                tracing::error!(url = %url, error = %e, "Metadata dump failed");
                AppError::MetadataUnavailable
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            tracing::error!(
                url = %url,
                code = ?output.status.code(),
                "Metadata dump exited with failure: {}",
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            );
            return Err(AppError::MetadataUnavailable);
        }

        let info = parse_media_info(&output.stdout, url).map_err(|e| {
            tracing::error!(url = %url, error = %e, "Unusable metadata output");
            AppError::MetadataUnavailable
        })?;

        tracing::info!(
            "Metadata for {}: \"{}\", {} formats",
            url,
            info.video_details.title,
            info.formats.len()
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::formats::FormatKind;
    use pretty_assertions::assert_eq;

    fn url() -> Url {
        Url::parse("https://www.youtube.com/watch?v=abc").unwrap()
    }

    const SAMPLE: &str = r#"{
        "title": "Sample clip",
        "thumbnail": "https://i.ytimg.com/vi/abc/hq.jpg",
        "duration": 10,
        "uploader": "Someone",
        "view_count": 42,
        "formats": [
            {"format_id": "sb0", "ext": "mhtml", "vcodec": "none", "acodec": "none"},
            {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "abr": 128},
            {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1", "acodec": "none", "filesize": 5000},
            {"format_id": "18", "ext": "mp4", "height": 360, "vcodec": "avc1", "acodec": "mp4a"},
            {"format_id": "18", "ext": "mp4", "height": 720, "vcodec": "avc1", "acodec": "mp4a"}
        ]
    }"#;

    #[test]
    fn test_parse_media_info() {
        let info = parse_media_info(SAMPLE.as_bytes(), &url()).unwrap();

        assert_eq!(
            info.video_details,
            VideoDetails {
                title: "Sample clip".to_string(),
                thumbnail: Some("https://i.ytimg.com/vi/abc/hq.jpg".to_string()),
                duration: Some(10.0),
                author: Some("Someone".to_string()),
                view_count: Some(42),
                platform: "YouTube",
            }
        );

        let ids: Vec<&str> = info.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, vec!["18", "137", "140"]);
        assert_eq!(info.formats[0].quality, "360p");
        assert_eq!(info.formats[2].kind, FormatKind::AudioOnly);
        assert_eq!(info.formats[2].filesize, Some(160_000));
    }

    #[test]
    fn test_serialized_shape() {
        let info = parse_media_info(SAMPLE.as_bytes(), &url()).unwrap();
        let value = serde_json::to_value(&info).unwrap();

        assert_eq!(value["videoDetails"]["viewCount"], 42);
        assert_eq!(value["videoDetails"]["platform"], "YouTube");
        assert_eq!(value["formats"][0]["kind"], "combined");
        assert_eq!(value["formats"][1]["kind"], "video_only");
        assert_eq!(value["formats"][1]["filesize_source"], "exact");
    }

    #[test]
    fn test_single_format_document() {
        let doc = r#"{"title": "Reel", "format_id": "dash-hd", "ext": "mp4", "height": 1280, "duration": 5}"#;
        let info = parse_media_info(doc.as_bytes(), &url()).unwrap();
        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.formats[0].format_id, "dash-hd");
    }

    #[test]
    fn test_rejects_unusable_output() {
        assert!(matches!(parse_media_info(b"", &url()), Err(MetadataError::Empty)));
        assert!(matches!(parse_media_info(b"  \n\n", &url()), Err(MetadataError::Empty)));
        assert!(matches!(parse_media_info(b"{not json", &url()), Err(MetadataError::Json(_))));
        assert!(matches!(
            parse_media_info(br#"{"title": "x", "formats": []}"#, &url()),
            Err(MetadataError::NoFormats)
        ));
        assert!(matches!(
            parse_media_info(br#"{"formats": [{"format_id": "sb", "ext": "mhtml"}]}"#, &url()),
            Err(MetadataError::NoFormats)
        ));
    }

    #[test]
    fn test_only_first_document_is_read() {
        let doc = "{\n  \"title\": \"First\",\n  \"formats\": [{\"format_id\": \"18\"}]\n}\n{\"title\": \"Second\"}\n";
        let info = parse_media_info(doc.as_bytes(), &url()).unwrap();
        assert_eq!(info.video_details.title, "First");
        assert_eq!(info.formats.len(), 1);
    }

    #[test]
    fn test_missing_title_and_uploader_fallbacks() {
        let doc = r#"{"channel": "Chan", "formats": [{"format_id": "1"}]}"#;
        let info = parse_media_info(doc.as_bytes(), &url()).unwrap();
        assert_eq!(info.video_details.title, "Untitled");
        assert_eq!(info.video_details.author.as_deref(), Some("Chan"));
    }

    #[test]
    fn test_platform_name() {
        let cases = vec![
            ("https://youtu.be/abc", "YouTube"),
            ("https://m.youtube.com/watch?v=abc", "YouTube"),
            ("https://www.instagram.com/reel/x/", "Instagram"),
            ("https://www.tiktok.com/@a/video/1", "TikTok"),
            ("https://www.facebook.com/watch?v=1", "Facebook"),
            ("https://www.pinterest.com/pin/1/", "Pinterest"),
            ("https://example.com/v.mp4", "Web"),
        ];
        for (input, expected) in cases {
            assert_eq!(platform_name(&Url::parse(input).unwrap()), expected, "Failed for: {}", input);
        }
    }
}
