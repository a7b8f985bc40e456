//! Final transcode and output validation.

use std::path::{Path, PathBuf};
use tracing::info;

use muse_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_duration;
use crate::progress::FfmpegProgress;

/// Smallest final output accepted as a real video.
pub const MIN_OUTPUT_BYTES: u64 = 10 * 1024;

#[derive(Debug, Clone)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub file_size: u64,
}

/// Transcode `input` to the canonical profile and validate the result.
///
/// `on_fraction` receives the completed share of `expected_secs` as FFmpeg
/// reports it.
pub async fn encode_final<F>(
    input: &Path,
    output: &Path,
    profile: &EncodingProfile,
    expected_secs: f64,
    runner: &FfmpegRunner,
    on_fraction: F,
) -> MediaResult<EncodedVideo>
where
    F: Fn(f64) + Send + Sync + 'static,
{
    let cmd = FfmpegCommand::new(input, output).output_args(profile.final_args());
    runner
        .run_with_progress(&cmd, fraction_forwarder(expected_secs, on_fraction))
        .await?;

    let encoded = validate_output(output).await?;

    info!(
        output = %output.display(),
        duration = encoded.duration,
        file_size = encoded.file_size,
        codec = %profile.video_codec,
        preset = %profile.preset,
        "Encoded final video"
    );
    Ok(encoded)
}

/// Turn raw FFmpeg progress into fractions of `expected_secs`.
fn fraction_forwarder<F>(
    expected_secs: f64,
    on_fraction: F,
) -> impl Fn(FfmpegProgress) + Send + Sync + 'static
where
    F: Fn(f64) + Send + Sync + 'static,
{
    move |progress: FfmpegProgress| on_fraction(progress.fraction(expected_secs))
}

/// Check that `path` exists, is large enough and has a probeable duration.
///
/// A zero exit code from FFmpeg is not proof of a usable file.
pub async fn validate_output(path: &Path) -> MediaResult<EncodedVideo> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;

    let file_size = metadata.len();
    if file_size < MIN_OUTPUT_BYTES {
        return Err(MediaError::UndersizedOutput {
            path: path.to_path_buf(),
            size: file_size,
            min_size: MIN_OUTPUT_BYTES,
        });
    }

    let duration = probe_duration(path).await.map_err(|e| {
        MediaError::invalid_video(format!("{} failed validation: {}", path.display(), e))
    })?;

    Ok(EncodedVideo {
        path: path.to_path_buf(),
        duration,
        file_size,
    })
}
