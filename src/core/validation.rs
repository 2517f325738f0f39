//! URL and input validation utilities
//!
//! Every caller-supplied value that ends up in a yt-dlp argument vector passes
//! through here first:
//! - Media URL validation (allow-list of supported hosts)
//! - Format identifier validation (yt-dlp selector alphabet only)
//! - Filename sanitization for `Content-Disposition`

use thiserror::Error;
use url::Url;

/// Hosts accepted when no allow-list is configured.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "youtube-nocookie.com",
    "instagram.com",
    "tiktok.com",
    "facebook.com",
    "pinterest.com",
];

/// Upper bound for a format identifier / selector expression.
pub const MAX_FORMAT_ID_LEN: usize = 64;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Not an absolute http(s) URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Parsed fine, but the host is not on the allow-list
    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    /// Format identifier is empty, too long or contains characters
    /// outside the yt-dlp selector alphabet
    #[error("Invalid format identifier: {0}")]
    InvalidFormatId(String),
}

/// Validates a media URL against the host allow-list.
///
/// # Security
/// - Only HTTP/HTTPS schemes allowed
/// - Host must equal an allowed domain or be a subdomain of one
///   (`www.youtube.com` matches `youtube.com`, `youtube.evil.com` does not)
///
/// Returns the parsed URL so callers never forward the raw string.
///
/// # Examples
/// ```
/// use mediagate::core::validation::{validate_media_url, DEFAULT_ALLOWED_HOSTS};
///
/// assert!(validate_media_url("https://youtu.be/dQw4w9WgXcQ", DEFAULT_ALLOWED_HOSTS).is_ok());
/// assert!(validate_media_url("https://evil.com/watch?v=1", DEFAULT_ALLOWED_HOSTS).is_err());
/// assert!(validate_media_url("not a url", DEFAULT_ALLOWED_HOSTS).is_err());
/// ```
pub fn validate_media_url<S: AsRef<str>>(url: &str, allowed_hosts: &[S]) -> Result<Url, ValidationError> {
    let trimmed = url.trim();
    let parsed = Url::parse(trimmed).map_err(|_| ValidationError::InvalidUrl(trimmed.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::InvalidUrl(format!(
            "{} (invalid scheme: {})",
            trimmed,
            parsed.scheme()
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ValidationError::InvalidUrl(format!("{} (no host)", trimmed)))?
        .to_lowercase();

    if !is_allowed_host(&host, allowed_hosts) {
        return Err(ValidationError::UnsupportedHost(host));
    }

    Ok(parsed)
}

/// Exact match or dot-delimited subdomain match against the allow-list.
pub fn is_allowed_host<S: AsRef<str>>(host: &str, allowed_hosts: &[S]) -> bool {
    let host = host.trim_end_matches('.');
    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.as_ref();
        host == allowed
            || host
                .strip_suffix(allowed)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Validates a format identifier before it is placed after `-f`.
///
/// Accepts plain ids (`22`, `hls-1080p`, `dash-audio_eng=128000`) and selector
/// expressions (`bestvideo[height<=720]+bestaudio`). A leading `-` is rejected
/// so the value can never be read as an option.
pub fn validate_format_id(format_id: &str) -> Result<&str, ValidationError> {
    let id = format_id.trim();
    let valid = !id.is_empty()
        && id.len() <= MAX_FORMAT_ID_LEN
        && !id.starts_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-+/.,:=<>[]*!?".contains(c));

    if valid {
        Ok(id)
    } else {
        Err(ValidationError::InvalidFormatId(format_id.chars().take(MAX_FORMAT_ID_LEN).collect()))
    }
}

/// Sanitizes a filename by removing filesystem-unsafe characters.
///
/// Removes path separators, reserved characters (`:`, `*`, `?`, `"`, `<`,
/// `>`, `|`) and control characters.
///
/// # Examples
/// ```
/// use mediagate::core::validation::sanitize_filename;
///
/// assert_eq!(sanitize_filename("video:file"), "videofile");
/// assert_eq!(sanitize_filename("path/to/file"), "pathtofile");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !['/', '\\', ':', '*', '?', '"', '<', '>', '|'].contains(c))
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
