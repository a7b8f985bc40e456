//! Last-clip extension for residual shortfalls.

use std::path::{Path, PathBuf};
use tracing::info;

use muse_models::EncodingProfile;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::concat::concat_stream_copy;
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_duration_or;

/// Longest segment taken from the end of the clip for looping.
pub const MAX_LOOP_SEGMENT_SECS: f64 = 2.0;

/// Limits for extending the final clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtensionLimits {
    /// Deficits below this are covered by a frozen frame
    pub freeze_threshold_secs: f64,
    /// Hard cap on the extension
    pub max_extension_secs: f64,
}

impl Default for ExtensionLimits {
    fn default() -> Self {
        Self {
            freeze_threshold_secs: 2.0,
            max_extension_secs: 5.0,
        }
    }
}

/// How the final clip gets longer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtensionStrategy {
    None,
    /// Hold the last frame for `secs`, fading out.
    Freeze { secs: f64 },
    /// Repeat the last `segment_secs` `loops` times, then trim.
    Loop { segment_secs: f64, loops: u32 },
}

/// Choose a strategy for covering `deficit` seconds after a clip of
/// `clip_duration` seconds.
pub fn plan_extension(
    deficit: f64,
    clip_duration: f64,
    limits: &ExtensionLimits,
) -> MediaResult<ExtensionStrategy> {
    if deficit <= 0.0 {
        return Ok(ExtensionStrategy::None);
    }
    if deficit > limits.max_extension_secs {
        return Err(MediaError::ExtensionLimit {
            requested: deficit,
            max: limits.max_extension_secs,
        });
    }
    if deficit < limits.freeze_threshold_secs {
        return Ok(ExtensionStrategy::Freeze { secs: deficit });
    }

    let segment_secs = clip_duration.min(MAX_LOOP_SEGMENT_SECS);
    if segment_secs <= 0.0 {
        return Err(MediaError::invalid_video(
            "last clip has no frames to loop",
        ));
    }

    Ok(ExtensionStrategy::Loop {
        segment_secs,
        loops: (deficit / segment_secs).ceil() as u32,
    })
}

/// The final clip after extension.
#[derive(Debug, Clone)]
pub struct ExtendedClip {
    pub path: PathBuf,
    pub duration: f64,
    /// Loop repetitions used (0 for a freeze)
    pub loops: u32,
}

/// Extend the final clip by `deficit` seconds.
pub async fn extend_last_clip(
    input: &Path,
    clip_duration: f64,
    deficit: f64,
    limits: &ExtensionLimits,
    work_dir: &Path,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<ExtendedClip> {
    let strategy = plan_extension(deficit, clip_duration, limits)?;
    let target = clip_duration + deficit;
    let output = work_dir.join("last_extended.mp4");

    let loops = match strategy {
        ExtensionStrategy::None => {
            return Ok(ExtendedClip {
                path: input.to_path_buf(),
                duration: clip_duration,
                loops: 0,
            });
        }
        ExtensionStrategy::Freeze { secs } => {
            let filter = freeze_filter(clip_duration, secs);
            let cmd = FfmpegCommand::new(input, &output)
                .video_filter(filter)
                .output_args(profile.intermediate_video_args())
                .no_audio();
            runner.run(&cmd).await?;
            0
        }
        ExtensionStrategy::Loop {
            segment_secs,
            loops,
        } => {
            // Re-encoded so the segment opens on a keyframe with matching params
            let segment = work_dir.join("last_loop_segment.mp4");
            let cmd = FfmpegCommand::new(input, &segment)
                .seek_from_end(segment_secs)
                .output_args(profile.intermediate_video_args())
                .no_audio();
            runner.run(&cmd).await?;

            let mut parts = vec![input.to_path_buf()];
            parts.extend(std::iter::repeat(segment).take(loops as usize));
            concat_stream_copy(
                &parts,
                &work_dir.join("last_loop_list.txt"),
                &output,
                Some(target),
                runner,
            )
            .await?;
            loops
        }
    };

    let duration = probe_duration_or(&output, target).await;

    info!(
        deficit,
        strategy = ?strategy,
        duration,
        "Extended last clip"
    );

    Ok(ExtendedClip {
        path: output,
        duration,
        loops,
    })
}

/// Clone the last frame for `secs` and fade the held frame to black.
pub fn freeze_filter(clip_duration: f64, secs: f64) -> String {
    format!(
        "tpad=stop_mode=clone:stop_duration={:.3},fade=t=out:st={:.3}:d={:.3}",
        secs, clip_duration, secs
    )
}
