//! Clip normalization to the canonical frame size and rate.

use std::path::{Path, PathBuf};
use tracing::info;

use muse_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe_duration_or;

/// A clip after normalization.
#[derive(Debug, Clone)]
pub struct NormalizedClip {
    pub index: u32,
    pub path: PathBuf,
    /// Measured duration, or the generator's figure when probing failed
    pub duration: f64,
}

/// Build the scale/pad/fps filter for the canonical frame.
///
/// Off-aspect sources are letterboxed rather than stretched.
pub fn normalize_filter(width: u32, height: u32, fps: u32) -> String {
    format!(
        "scale={w}:{h}:flags=lanczos:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1,fps={fps},format=yuv420p",
        w = width,
        h = height,
        fps = fps
    )
}

/// Re-encode one clip to the canonical profile.
///
/// Audio is dropped; the music track is muxed in later. `reported_duration`
/// is used when the output cannot be probed.
pub async fn normalize_clip(
    index: u32,
    input: &Path,
    output: &Path,
    reported_duration: f64,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<NormalizedClip> {
    info!(
        clip_index = index,
        input = %input.display(),
        width = profile.width,
        height = profile.height,
        fps = profile.fps,
        "Normalizing clip"
    );

    let cmd = FfmpegCommand::new(input, output)
        .video_filter(normalize_filter(profile.width, profile.height, profile.fps))
        .output_args(profile.intermediate_video_args())
        .no_audio();

    runner.run(&cmd).await?;

    let duration = probe_duration_or(output, reported_duration).await;

    Ok(NormalizedClip {
        index,
        path: output.to_path_buf(),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_filter() {
        let filter = normalize_filter(1280, 720, 24);
        assert!(filter.starts_with("scale=1280:720:flags=lanczos"));
        assert!(filter.contains("pad=1280:720"));
        assert!(filter.contains("fps=24"));
        assert!(filter.ends_with("format=yuv420p"));
    }
}
