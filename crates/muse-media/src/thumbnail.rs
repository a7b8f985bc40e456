//! Thumbnail generation.

use std::path::{Path, PathBuf};
use tracing::warn;

use muse_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP_SECS};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Seek position for the thumbnail, kept inside short videos.
pub fn thumbnail_timestamp(video_duration: f64) -> f64 {
    THUMBNAIL_TIMESTAMP_SECS.min(video_duration / 2.0).max(0.0)
}

/// Generate a JPEG thumbnail from a video file.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    video_duration: f64,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    let cmd = FfmpegCommand::new(video_path, output_path)
        .seek(thumbnail_timestamp(video_duration))
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
        .log_level("error");

    runner.run(&cmd).await
}

/// Generate a thumbnail, returning `None` when it cannot be made.
pub async fn try_generate_thumbnail(
    video_path: &Path,
    output_path: &Path,
    video_duration: f64,
    runner: &FfmpegRunner,
) -> Option<PathBuf> {
    match generate_thumbnail(video_path, output_path, video_duration, runner).await {
        Ok(()) if output_path.exists() => Some(output_path.to_path_buf()),
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "Thumbnail generation failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_timestamp() {
        assert!((thumbnail_timestamp(18.0) - 1.0).abs() < 1e-9);
        assert!((thumbnail_timestamp(1.0) - 0.5).abs() < 1e-9);
        assert_eq!(thumbnail_timestamp(0.0), 0.0);
    }
}
