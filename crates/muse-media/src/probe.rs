//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::warn;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Timeout for a single ffprobe call.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Media file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Width in pixels (0 without a video stream)
    pub width: u32,
    /// Height in pixels (0 without a video stream)
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Codec of the first video stream, or of the first stream otherwise
    pub codec: String,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Probe a media file, failing on any problem.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, output)
        .await
        .map_err(|_| MediaError::Timeout(PROBE_TIMEOUT.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
    Ok(media_info_from(probe))
}

fn media_info_from(probe: FfprobeOutput) -> MediaInfo {
    let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Container duration first, stream duration when the container has none
    let duration = parse_f64(probe.format.duration.as_deref())
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| parse_f64(s.duration.as_deref()))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let fps = video_stream
        .and_then(|s| s.avg_frame_rate.as_deref().or(s.r_frame_rate.as_deref()))
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    let codec = video_stream
        .or_else(|| probe.streams.first())
        .and_then(|s| s.codec_name.clone())
        .unwrap_or_default();

    MediaInfo {
        duration,
        has_video: video_stream.is_some(),
        has_audio,
        width: video_stream.and_then(|s| s.width).unwrap_or(0),
        height: video_stream.and_then(|s| s.height).unwrap_or(0),
        fps,
        codec,
        size: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
        bitrate: probe
            .format
            .bit_rate
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    }
}

/// Get a positive duration in seconds, failing otherwise.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();
    let info = probe_media(path).await?;
    if info.duration > 0.0 && info.duration.is_finite() {
        Ok(info.duration)
    } else {
        Err(MediaError::invalid_video(format!(
            "{} has no measurable duration",
            path.display()
        )))
    }
}

/// Get duration in seconds, returning `fallback` when probing fails.
///
/// Used for diagnostics and estimates that must never fail a run.
pub async fn probe_duration_or(path: impl AsRef<Path>, fallback: f64) -> f64 {
    let path = path.as_ref();
    match probe_duration(path).await {
        Ok(duration) => duration,
        Err(e) => {
            warn!(
                path = %path.display(),
                fallback_secs = fallback,
                error = %e,
                "Duration probe failed, using estimate"
            );
            fallback
        }
    }
}

fn parse_f64(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}
