//! Clip joining with hard cuts or dissolves.
//!
//! All-cut sequences are joined with the concat demuxer. When dissolves are
//! requested, runs of hard-cut clips are concatenated into sections inside a
//! single filter graph and adjacent sections are joined with `xfade`. The
//! dissolve path falls back to plain concatenation, with the reason logged,
//! when it cannot be built reliably for the clip set.
//!
//! Beat times only move dissolves. Hard cuts stay on clip boundaries.

use std::fmt;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use muse_models::{EncodingProfile, TransitionPlan, TransitionType};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::concat::concat_stream_copy;
use crate::error::{MediaError, MediaResult};

/// Largest clip count handled by the dissolve graph.
pub const MAX_XFADE_CLIPS: usize = 24;

/// Default distance within which a dissolve snaps to a beat.
pub const DEFAULT_BEAT_SNAP_TOLERANCE: f64 = 0.15;

/// Default cap on a single dissolve.
pub const DEFAULT_MAX_TRANSITION_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionSettings {
    pub max_transition_secs: f64,
    pub beat_snap_tolerance: f64,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            max_transition_secs: DEFAULT_MAX_TRANSITION_SECS,
            beat_snap_tolerance: DEFAULT_BEAT_SNAP_TOLERANCE,
        }
    }
}

/// A clip ready to be joined.
#[derive(Debug, Clone)]
pub struct SequenceClip {
    pub path: PathBuf,
    pub duration: f64,
}

/// Why the dissolve path was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    TooManyClips { count: usize },
    ClipTooShort {
        index: usize,
        duration: f64,
        required: f64,
    },
    XfadeFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyClips { count } => {
                write!(f, "{} clips exceeds the {} clip limit", count, MAX_XFADE_CLIPS)
            }
            Self::ClipTooShort {
                index,
                duration,
                required,
            } => write!(
                f,
                "clip {} is {:.3}s, dissolve needs {:.3}s",
                index, duration, required
            ),
            Self::XfadeFailed(e) => write!(f, "xfade render failed: {}", e),
        }
    }
}

/// Joined video.
#[derive(Debug, Clone)]
pub struct ComposedVideo {
    pub path: PathBuf,
    /// Dissolves rendered (0 when everything was cut)
    pub transitions_applied: u32,
    pub fallback: Option<FallbackReason>,
}

/// One `xfade` between the running output and the next section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XfadeJoin {
    /// Clip before the boundary
    pub from_index: u32,
    pub transition_type: TransitionType,
    pub duration: f64,
    /// Dissolve start on the output timeline
    pub offset: f64,
    pub snapped: bool,
}

impl XfadeJoin {
    fn xfade_name(&self) -> &'static str {
        match self.transition_type {
            TransitionType::Fade => "fadeblack",
            _ => "fade",
        }
    }
}

/// Clip index ranges joined by hard cuts, split at every dissolve.
pub fn sections(clip_count: usize, plan: &TransitionPlan) -> Vec<Range<usize>> {
    let mut sections = Vec::new();
    let mut start = 0;
    for boundary in &plan.boundaries {
        if boundary.transition_type.is_dissolve() {
            let end = boundary.from_index as usize + 1;
            sections.push(start..end);
            start = end;
        }
    }
    if start < clip_count {
        sections.push(start..clip_count);
    }
    sections
}

/// Deterministic conditions under which dissolves are not attempted.
pub fn fallback_reason(durations: &[f64], plan: &TransitionPlan) -> Option<FallbackReason> {
    if durations.len() > MAX_XFADE_CLIPS {
        return Some(FallbackReason::TooManyClips {
            count: durations.len(),
        });
    }

    for boundary in plan.boundaries.iter().filter(|b| b.transition_type.is_dissolve()) {
        let required = 2.0 * boundary.duration;
        let from = boundary.from_index as usize;
        for index in [from, from + 1] {
            let duration = durations.get(index).copied().unwrap_or(0.0);
            if duration < required {
                return Some(FallbackReason::ClipTooShort {
                    index,
                    duration,
                    required,
                });
            }
        }
    }

    None
}

/// Nearest beat to `time` within `tolerance`.
pub fn snap_to_beat(time: f64, beats: &[f64], tolerance: f64) -> Option<f64> {
    beats
        .iter()
        .copied()
        .filter(|b| b.is_finite() && (b - time).abs() <= tolerance)
        .min_by(|a, b| (a - time).abs().total_cmp(&(b - time).abs()))
}

/// Place every dissolve on the output timeline.
///
/// A dissolve is centred on its clip boundary, or on a nearby beat when
/// the shifted dissolve still fits between the previous dissolve and the
/// end of the running output.
pub fn plan_xfades(
    durations: &[f64],
    plan: &TransitionPlan,
    beats: &[f64],
    tolerance: f64,
) -> Vec<XfadeJoin> {
    let ranges = sections(durations.len(), plan);
    let section_len = |r: &Range<usize>| {
        durations
            .get(r.clone())
            .map_or(0.0, |d| d.iter().sum::<f64>())
    };
    let dissolves: Vec<_> = plan
        .boundaries
        .iter()
        .filter(|b| b.transition_type.is_dissolve())
        .collect();

    let mut joins = Vec::with_capacity(dissolves.len());
    let Some(first) = ranges.first() else {
        return joins;
    };
    let mut running = section_len(first);
    let mut earliest = 0.0_f64;

    for (boundary, range) in dissolves.iter().zip(ranges.iter().skip(1)) {
        let d = boundary.duration;
        let latest = running - d;
        let mut offset = latest;
        let mut snapped = false;

        if let Some(beat) = snap_to_beat(running - d / 2.0, beats, tolerance) {
            let candidate = beat - d / 2.0;
            if candidate >= earliest && candidate <= latest {
                offset = candidate;
                snapped = true;
            }
        }

        joins.push(XfadeJoin {
            from_index: boundary.from_index,
            transition_type: boundary.transition_type,
            duration: d,
            offset,
            snapped,
        });

        earliest = offset + d;
        running = offset + section_len(range);
    }

    joins
}

/// Build the dissolve filter graph. Returns the graph and its output label.
pub fn build_xfade_filter(
    clip_count: usize,
    fps: u32,
    plan: &TransitionPlan,
    joins: &[XfadeJoin],
) -> (String, String) {
    let mut parts = Vec::new();

    for i in 0..clip_count {
        parts.push(format!(
            "[{i}:v]settb=AVTB,setpts=PTS-STARTPTS,fps={fps},format=yuv420p[v{i}]"
        ));
    }

    let mut section_labels = Vec::new();
    for (s, range) in sections(clip_count, plan).iter().enumerate() {
        if range.len() == 1 {
            section_labels.push(format!("v{}", range.start));
            continue;
        }
        let inputs: String = range.clone().map(|i| format!("[v{i}]")).collect();
        parts.push(format!("{inputs}concat=n={}:v=1:a=0[s{s}]", range.len()));
        section_labels.push(format!("s{s}"));
    }

    let mut current = section_labels.first().cloned().unwrap_or_default();
    for (j, (join, next)) in joins.iter().zip(section_labels.iter().skip(1)).enumerate() {
        let out = format!("x{}", j + 1);
        parts.push(format!(
            "[{current}][{next}]xfade=transition={}:duration={:.3}:offset={:.3}[{out}]",
            join.xfade_name(),
            join.duration,
            join.offset
        ));
        current = out;
    }

    (parts.join(";"), current)
}

/// Join `clips` in order according to `plan`.
pub async fn compose_transitions(
    clips: &[SequenceClip],
    plan: &TransitionPlan,
    beats: Option<&[f64]>,
    settings: &TransitionSettings,
    work_dir: &Path,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<ComposedVideo> {
    if clips.is_empty() {
        return Err(MediaError::internal("No clips to compose"));
    }

    let output = work_dir.join("composed.mp4");
    let paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
    let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();

    let fallback = if !plan.has_dissolves() {
        None
    } else if let Some(reason) = fallback_reason(&durations, plan) {
        Some(reason)
    } else {
        let joins = plan_xfades(
            &durations,
            plan,
            beats.unwrap_or_default(),
            settings.beat_snap_tolerance,
        );
        match render_xfades(&paths, plan, &joins, &output, profile, runner).await {
            Ok(()) => {
                info!(
                    clips = clips.len(),
                    dissolves = joins.len(),
                    snapped = joins.iter().filter(|j| j.snapped).count(),
                    "Composed clips with dissolves"
                );
                return Ok(ComposedVideo {
                    path: output,
                    transitions_applied: joins.len() as u32,
                    fallback: None,
                });
            }
            Err(e @ MediaError::FfmpegNotFound) => return Err(e),
            Err(e) => Some(FallbackReason::XfadeFailed(e.to_string())),
        }
    };

    if let Some(reason) = &fallback {
        warn!(
            reason = %reason,
            requested = plan.dissolve_count(),
            "Dissolves skipped, joining clips with hard cuts"
        );
    }

    concat_stream_copy(
        &paths,
        &work_dir.join("concat_list.txt"),
        &output,
        None,
        runner,
    )
    .await?;

    Ok(ComposedVideo {
        path: output,
        transitions_applied: 0,
        fallback,
    })
}

async fn render_xfades(
    paths: &[PathBuf],
    plan: &TransitionPlan,
    joins: &[XfadeJoin],
    output: &Path,
    profile: &EncodingProfile,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    let (first, rest) = paths
        .split_first()
        .ok_or_else(|| MediaError::internal("No clips to compose"))?;

    let (filter, label) = build_xfade_filter(paths.len(), profile.fps, plan, joins);
    debug!("Filter graph:\n{}", filter);

    let cmd = rest
        .iter()
        .fold(FfmpegCommand::new(first, output), |cmd, p| cmd.add_input(p))
        .filter_complex(filter)
        .map(format!("[{}]", label))
        .output_args(profile.intermediate_video_args())
        .no_audio();

    runner.run(&cmd).await
}
