//! Audio muxing.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use muse_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe_duration_or;

/// Drift above this is logged as a warning.
pub const DRIFT_WARN_SECS: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct SyncedVideo {
    pub path: PathBuf,
    pub duration: f64,
    /// `|muxed duration - audio duration|`
    pub sync_drift: f64,
}

/// Mux `audio` onto `video`, capped to the audio length.
///
/// The video stream is copied; audio is re-encoded with the profile codec.
pub async fn sync_audio(
    video: &Path,
    audio: &Path,
    audio_duration: f64,
    output: &Path,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<SyncedVideo> {
    let cmd = mux_command(video, audio, audio_duration, output, profile);
    runner.run(&cmd).await?;

    let duration = probe_duration_or(output, audio_duration).await;
    let sync_drift = (duration - audio_duration).abs();

    if sync_drift > DRIFT_WARN_SECS {
        warn!(
            duration,
            audio_duration, sync_drift, "Muxed video drifts from audio"
        );
    } else {
        info!(duration, audio_duration, sync_drift, "Muxed audio");
    }

    Ok(SyncedVideo {
        path: output.to_path_buf(),
        duration,
        sync_drift,
    })
}

/// Copy the video stream, re-encode the audio and stop at the audio length.
fn mux_command(
    video: &Path,
    audio: &Path,
    audio_duration: f64,
    output: &Path,
    profile: &EncodingProfile,
) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .add_input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .audio_codec(profile.audio_codec.clone())
        .audio_bitrate(profile.audio_bitrate.clone())
        .output_duration(audio_duration)
}
