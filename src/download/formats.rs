//! Format normalization for yt-dlp metadata.
//!
//! Turns the raw `formats[]` array of `--dump-json` into the list shown to
//! clients:
//! 1. skip entries without `format_id` or with a disallowed container
//! 2. derive a quality label (explicit label → `{height}p` → `Audio` → id)
//! 3. classify as combined / video-only / audio-only
//! 4. resolve size (exact → approximate → bitrate × duration / 8 → unknown)
//! 5. deduplicate by `format_id`, first occurrence wins
//! 6. sort by class, then by label height descending

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Containers never offered to clients (storyboards, legacy mobile).
pub const DISALLOWED_EXTENSIONS: &[&str] = &["mhtml", "3gp"];

/// One entry of yt-dlp's `formats` array. Only the fields we read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    #[serde(alias = "qualityLabel")]
    pub quality_label: Option<String>,
    pub ext: Option<String>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    /// Total bitrate, kbps
    pub tbr: Option<f64>,
    /// Video bitrate, kbps
    pub vbr: Option<f64>,
    /// Audio bitrate, kbps
    pub abr: Option<f64>,
}

impl RawFormat {
    /// A missing codec field counts as present; only an explicit `"none"`
    /// marks a missing track.
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref() != Some("none")
    }
}

/// Track layout of a format. Exactly one per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Combined,
    VideoOnly,
    AudioOnly,
}

impl FormatKind {
    /// Video and audio both present (or both absent) is `Combined`.
    pub fn classify(has_video: bool, has_audio: bool) -> Self {
        match (has_video, has_audio) {
            (true, false) => FormatKind::VideoOnly,
            (false, true) => FormatKind::AudioOnly,
            _ => FormatKind::Combined,
        }
    }

    /// Sort key: combined first, audio last.
    pub fn priority(&self) -> u8 {
        match self {
            FormatKind::Combined => 0,
            FormatKind::VideoOnly => 1,
            FormatKind::AudioOnly => 2,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FormatKind::Combined => "Video+Audio",
            FormatKind::VideoOnly => "Video Only",
            FormatKind::AudioOnly => "Audio Only",
        }
    }
}

/// Where a size figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    Exact,
    Approximate,
    Estimated,
}

/// One selectable rendition, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Format {
    pub format_id: String,
    /// e.g. `720p (Video Only) .mp4`
    pub label: String,
    /// e.g. `720p`, `Audio`
    pub quality: String,
    pub ext: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_source: Option<SizeSource>,
    pub kind: FormatKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbr: Option<f64>,
}

impl Format {
    /// Normalizes one raw entry, or `None` if it must be skipped.
    pub fn from_raw(raw: &RawFormat, duration_secs: Option<f64>) -> Option<Self> {
        let format_id = raw.format_id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;

        let ext = raw
            .ext
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        if ext
            .as_deref()
            .is_some_and(|e| DISALLOWED_EXTENSIONS.contains(&e))
        {
            return None;
        }

        let kind = FormatKind::classify(raw.has_video(), raw.has_audio());
        let quality = derive_quality(raw, format_id);
        let size = resolve_size(raw, kind, duration_secs);

        let mut label = format!("{} ({})", quality, kind.display_name());
        if let Some(ext) = &ext {
            label.push_str(&format!(" .{}", ext));
        }

        Some(Format {
            format_id: format_id.to_string(),
            label,
            quality,
            ext,
            filesize: size.map(|(bytes, _)| bytes),
            filesize_source: size.map(|(_, source)| source),
            kind,
            height: raw.height.filter(|h| *h > 0),
            fps: raw.fps.filter(|f| f.is_finite() && *f > 0.0),
            tbr: raw.tbr.filter(|b| b.is_finite() && *b > 0.0),
        })
    }

    /// Numeric height parsed from the quality label (`"1080p60"` → 1080,
    /// `"Audio"` → 0).
    pub fn label_height(&self) -> u32 {
        leading_number(&self.quality)
    }
}

/// Explicit label → `{height}p` → `Audio` → raw identifier.
fn derive_quality(raw: &RawFormat, format_id: &str) -> String {
    if let Some(label) = raw.quality_label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }
    if let Some(height) = raw.height.filter(|h| *h > 0) {
        return format!("{}p", height);
    }
    if !raw.has_video() {
        return "Audio".to_string();
    }
    format_id.to_string()
}

fn positive(value: Option<f64>) -> Option<u64> {
    value.filter(|v| v.is_finite() && *v > 0.0).map(|v| v.round() as u64)
}

/// Explicit size wins; estimation only runs when both size fields are absent.
fn resolve_size(raw: &RawFormat, kind: FormatKind, duration_secs: Option<f64>) -> Option<(u64, SizeSource)> {
    if let Some(bytes) = positive(raw.filesize) {
        return Some((bytes, SizeSource::Exact));
    }
    if let Some(bytes) = positive(raw.filesize_approx) {
        return Some((bytes, SizeSource::Approximate));
    }

    let bitrate = match kind {
        FormatKind::Combined => raw.tbr,
        FormatKind::VideoOnly => raw.vbr.or(raw.tbr),
        FormatKind::AudioOnly => raw.abr.or(raw.tbr),
    };

    estimate_size(bitrate?, duration_secs?).map(|bytes| (bytes, SizeSource::Estimated))
}

/// `bitrate_kbps × 1000 × duration / 8`, rounded to whole bytes.
pub fn estimate_size(bitrate_kbps: f64, duration_secs: f64) -> Option<u64> {
    if !(bitrate_kbps.is_finite() && duration_secs.is_finite()) || bitrate_kbps <= 0.0 || duration_secs <= 0.0 {
        return None;
    }
    Some((bitrate_kbps * 1000.0 * duration_secs / 8.0).round() as u64)
}

/// Leading decimal digits of `s`, or 0.
fn leading_number(s: &str) -> u32 {
    let digits: String = s.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Runs the whole normalization pipeline over a raw `formats` array.
pub fn normalize_formats(raw: &[RawFormat], duration_secs: Option<f64>) -> Vec<Format> {
    let mut seen = HashSet::new();
    let mut formats: Vec<Format> = raw
        .iter()
        .filter_map(|r| Format::from_raw(r, duration_secs))
        .filter(|f| seen.insert(f.format_id.clone()))
        .collect();

    sort_formats(&mut formats);
    formats
}

/// Class first, then label height descending. Stable, so ties keep input order.
pub fn sort_formats(formats: &mut [Format]) {
    formats.sort_by(|a, b| {
        a.kind
            .priority()
            .cmp(&b.kind.priority())
            .then_with(|| b.label_height().cmp(&a.label_height()))
    });
}
