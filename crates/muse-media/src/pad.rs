//! Still-frame tail so the video never ends before the audio.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use muse_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::concat::concat_stream_copy;
use crate::error::MediaResult;
use crate::probe::probe_duration_or;

/// Video shorter than the audio by no more than this is left alone.
pub const PAD_TOLERANCE_SECS: f64 = 0.1;

/// Longest fade to black at the end of a padded tail.
const TAIL_FADE_SECS: f64 = 1.0;

/// Video after padding.
#[derive(Debug, Clone)]
pub struct PaddedVideo {
    pub path: PathBuf,
    pub duration: f64,
    /// Length of the appended tail, 0 when nothing was added
    pub padded_secs: f64,
}

/// Seconds of tail needed to reach `audio_duration`, if any.
pub fn padding_needed(video_duration: f64, audio_duration: f64) -> Option<f64> {
    let gap = audio_duration - video_duration;
    (gap > PAD_TOLERANCE_SECS).then_some(gap)
}

/// Filter for the still tail: fade to black over its final second.
pub fn tail_filter(tail_secs: f64, fps: u32) -> String {
    let fade = tail_secs.min(TAIL_FADE_SECS);
    format!(
        "fps={},format=yuv420p,fade=t=out:st={:.3}:d={:.3}",
        fps,
        (tail_secs - fade).max(0.0),
        fade
    )
}

/// Append a still tail to `video` when it is shorter than the audio.
pub async fn pad_video_to_audio(
    video: &Path,
    audio_duration: f64,
    work_dir: &Path,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<PaddedVideo> {
    let video_duration = probe_duration_or(video, 0.0).await;

    let Some(tail_secs) = padding_needed(video_duration, audio_duration) else {
        debug!(
            video_duration,
            audio_duration, "Video covers the audio, no padding"
        );
        return Ok(PaddedVideo {
            path: video.to_path_buf(),
            duration: video_duration,
            padded_secs: 0.0,
        });
    };

    let last_frame = work_dir.join("last_frame.png");
    let cmd = FfmpegCommand::new(video, &last_frame)
        .seek_from_end(0.1)
        .single_frame();
    runner.run(&cmd).await?;

    let tail = work_dir.join("pad_tail.mp4");
    let cmd = FfmpegCommand::new(&last_frame, &tail)
        .input_args(["-loop", "1", "-framerate"])
        .input_arg(profile.fps.to_string())
        .output_duration(tail_secs)
        .video_filter(tail_filter(tail_secs, profile.fps))
        .output_args(profile.intermediate_video_args())
        .no_audio();
    runner.run(&cmd).await?;

    let output = work_dir.join("padded.mp4");
    concat_stream_copy(
        &[video.to_path_buf(), tail],
        &work_dir.join("pad_list.txt"),
        &output,
        None,
        runner,
    )
    .await?;

    let duration = probe_duration_or(&output, video_duration + tail_secs).await;

    info!(
        video_duration,
        audio_duration,
        padded_secs = tail_secs,
        "Padded video with still tail"
    );

    Ok(PaddedVideo {
        path: output,
        duration,
        padded_secs: tail_secs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_within_tolerance_is_skipped() {
        assert_eq!(padding_needed(18.0, 18.0), None);
        assert_eq!(padding_needed(17.95, 18.0), None);
        assert_eq!(padding_needed(19.0, 18.0), None);
    }

    #[test]
    fn test_padding_covers_gap() {
        let gap = padding_needed(16.5, 18.0).unwrap();
        assert!((gap - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_tail_filter_fades_last_second() {
        assert_eq!(
            tail_filter(3.0, 24),
            "fps=24,format=yuv420p,fade=t=out:st=2.000:d=1.000"
        );
        assert_eq!(
            tail_filter(0.5, 30),
            "fps=30,format=yuv420p,fade=t=out:st=0.000:d=0.500"
        );
    }
}
