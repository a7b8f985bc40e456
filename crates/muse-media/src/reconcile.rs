//! Cascading duration compensation.
//!
//! Generated clips rarely match their planned length. Trimming each clip to
//! its own target lets the error pile up against the fixed audio track, so
//! the reconciler walks the clips once in index order and carries any unmet
//! duration forward as debt:
//!
//! - `extended_target = target + debt`
//! - a clip that reaches its extended target is cut to it and clears the debt
//! - a clip that falls short is used whole and passes the remaining debt on,
//!   including deficits smaller than the comparison tolerance
//!
//! Only shortfalls cascade. A clip longer than its extended target never
//! creates credit for later clips, and no earlier clip is revisited.
//!
//! Planning is pure ([`plan_compensation`]); [`apply_plan`] performs the
//! stream-copy cuts the plan asks for.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use muse_models::{CompensationEvent, CompensationMetrics};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Default tolerance when comparing durations.
pub const DEFAULT_DURATION_EPSILON: f64 = 0.05;

/// Duration inputs for one clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipTiming {
    pub index: u32,
    /// Planned length the cascade works against
    pub target: f64,
    /// Planned length before any buffer was added
    pub original_target: f64,
    /// Measured length
    pub actual: f64,
}

impl ClipTiming {
    pub fn new(index: u32, target: f64, actual: f64) -> Self {
        Self {
            index,
            target,
            original_target: target,
            actual,
        }
    }

    pub fn with_original_target(mut self, original_target: f64) -> Self {
        self.original_target = original_target;
        self
    }
}

/// What the reconciler decided for one clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ClipDecision {
    /// Matches its target with no debt to absorb.
    Keep,
    /// Absorbed the entering debt or lost surplus. `cut` is set when the
    /// file has to be shortened.
    Trim { cut: bool },
    /// Shorter than its extended target; the deficit carries forward.
    Short,
}

/// Reconciler output for one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedClip {
    pub index: u32,
    pub target: f64,
    pub original_target: f64,
    pub actual: f64,
    /// Debt entering this clip
    pub debt_in: f64,
    pub extended_target: f64,
    /// Length the clip contributes to the timeline
    pub applied_duration: f64,
    pub decision: ClipDecision,
}

impl PlannedClip {
    pub fn is_trimmed(&self) -> bool {
        matches!(self.decision, ClipDecision::Trim { .. })
    }

    /// Whether FFmpeg has to shorten the file.
    pub fn requires_cut(&self) -> bool {
        matches!(self.decision, ClipDecision::Trim { cut: true })
    }

    /// Debt still owed after this clip.
    pub fn debt_out(&self) -> f64 {
        (self.extended_target - self.actual).max(0.0)
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompensationPlan {
    pub clips: Vec<PlannedClip>,
    /// Debt left after the last clip, never negative
    pub final_shortfall: f64,
}

impl CompensationPlan {
    pub fn clips_trimmed(&self) -> u32 {
        self.clips.iter().filter(|c| c.is_trimmed()).count() as u32
    }

    pub fn cuts_required(&self) -> usize {
        self.clips.iter().filter(|c| c.requires_cut()).count()
    }

    pub fn applied_total(&self) -> f64 {
        self.clips.iter().map(|c| c.applied_duration).sum()
    }

    pub fn intended_total(&self) -> f64 {
        self.clips.iter().map(|c| c.original_target).sum()
    }

    /// Compensation record for the finished video.
    pub fn metrics(&self) -> CompensationMetrics {
        let events = self
            .clips
            .iter()
            .filter(|c| c.is_trimmed())
            .map(|c| CompensationEvent {
                index: c.index,
                original_target: c.original_target,
                extended_target: c.extended_target,
                compensation: c.debt_in,
            })
            .collect::<Vec<_>>();

        CompensationMetrics {
            clips_trimmed: events.len() as u32,
            cumulative_shortfall: self.final_shortfall,
            events,
        }
    }
}

/// Plan the cascade over `timings`, which must be in index order.
pub fn plan_compensation(timings: &[ClipTiming], epsilon: f64) -> CompensationPlan {
    let epsilon = epsilon.max(0.0);
    let mut debt = 0.0_f64;
    let mut clips = Vec::with_capacity(timings.len());

    for timing in timings {
        let debt_in = debt;
        let extended_target = timing.target + debt_in;

        // Epsilon only decides cuts and trim accounting; every deficit carries
        debt = (extended_target - timing.actual).max(0.0);
        let applied_duration = timing.actual.min(extended_target);

        let decision = if timing.actual + epsilon >= extended_target {
            let cut = timing.actual - extended_target > epsilon;
            if cut || debt_in > epsilon {
                ClipDecision::Trim { cut }
            } else {
                ClipDecision::Keep
            }
        } else {
            ClipDecision::Short
        };

        debug!(
            clip_index = timing.index,
            target = timing.target,
            actual = timing.actual,
            debt_in,
            extended_target,
            applied = applied_duration,
            decision = ?decision,
            "Planned clip compensation"
        );

        clips.push(PlannedClip {
            index: timing.index,
            target: timing.target,
            original_target: timing.original_target,
            actual: timing.actual,
            debt_in,
            extended_target,
            applied_duration,
            decision,
        });
    }

    CompensationPlan {
        clips,
        final_shortfall: debt.max(0.0),
    }
}

/// Residual shortfall policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShortfallThresholds {
    /// Below this fraction the shortfall is accepted silently
    pub accept: f64,
    /// At or above this fraction the last clip is extended
    pub extend: f64,
    /// At or above this fraction the run fails
    pub fail: f64,
    /// Largest extension the last clip may receive
    pub max_extension_secs: f64,
}

impl Default for ShortfallThresholds {
    fn default() -> Self {
        Self {
            accept: 0.10,
            extend: 0.20,
            fail: 0.50,
            max_extension_secs: 5.0,
        }
    }
}

/// What to do about the shortfall left after the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum ShortfallAction {
    Accept,
    /// Accepted; the padder closes the gap.
    AcceptWithWarning { shortfall_pct: f64 },
    /// Extend the last clip by `deficit` seconds.
    Extend { deficit: f64, shortfall_pct: f64 },
    Fail { reason: String },
}

/// Classify `shortfall` against the intended total duration.
pub fn classify_shortfall(
    shortfall: f64,
    total_intended: f64,
    thresholds: &ShortfallThresholds,
) -> ShortfallAction {
    let shortfall = shortfall.max(0.0);
    if shortfall == 0.0 {
        return ShortfallAction::Accept;
    }
    if total_intended <= 0.0 {
        return ShortfallAction::Fail {
            reason: format!(
                "shortfall of {:.3}s against a non-positive intended total",
                shortfall
            ),
        };
    }

    let pct = shortfall / total_intended;

    if pct >= thresholds.fail {
        ShortfallAction::Fail {
            reason: format!(
                "shortfall {:.3}s is {:.1}% of {:.3}s, at or above the {:.0}% limit",
                shortfall,
                pct * 100.0,
                total_intended,
                thresholds.fail * 100.0
            ),
        }
    } else if pct >= thresholds.extend {
        if shortfall > thresholds.max_extension_secs {
            ShortfallAction::Fail {
                reason: format!(
                    "shortfall {:.3}s exceeds the {:.1}s extension cap",
                    shortfall, thresholds.max_extension_secs
                ),
            }
        } else {
            ShortfallAction::Extend {
                deficit: shortfall,
                shortfall_pct: pct,
            }
        }
    } else if pct >= thresholds.accept {
        ShortfallAction::AcceptWithWarning { shortfall_pct: pct }
    } else {
        ShortfallAction::Accept
    }
}

/// Cut the clips the plan shortens, in parallel and without re-encoding.
///
/// `inputs` maps clip index to its normalized file. Returns the clip files
/// in plan order; clips that need no cut are passed through unchanged.
pub async fn apply_plan(
    plan: &CompensationPlan,
    inputs: &HashMap<u32, PathBuf>,
    work_dir: &Path,
    runner: &FfmpegRunner,
) -> MediaResult<Vec<PathBuf>> {
    let mut sources = Vec::with_capacity(plan.clips.len());
    for clip in &plan.clips {
        let path = inputs.get(&clip.index).ok_or_else(|| {
            MediaError::internal(format!("No normalized file for clip {}", clip.index))
        })?;
        sources.push((clip, path));
    }

    let cuts = sources.iter().map(|(clip, path)| async move {
        if !clip.requires_cut() {
            return Ok((*path).clone());
        }

        let output = work_dir.join(format!("reconciled_{:03}.mp4", clip.index));
        let cmd = FfmpegCommand::new(path, &output)
            .output_duration(clip.extended_target)
            .codec_copy()
            .output_args(["-avoid_negative_ts", "make_zero"]);
        runner.run(&cmd).await?;

        info!(
            clip_index = clip.index,
            actual = clip.actual,
            trimmed_to = clip.extended_target,
            compensation = clip.debt_in,
            "Trimmed clip"
        );
        Ok::<_, MediaError>(output)
    });

    let outputs = join_all(cuts)
        .await
        .into_iter()
        .collect::<MediaResult<Vec<_>>>()?;

    if plan.final_shortfall > 0.0 {
        warn!(
            final_shortfall = plan.final_shortfall,
            "Cascade left a residual shortfall"
        );
    }

    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = DEFAULT_DURATION_EPSILON;

    fn timings(targets: &[f64], actuals: &[f64]) -> Vec<ClipTiming> {
        targets
            .iter()
            .zip(actuals)
            .enumerate()
            .map(|(i, (&t, &a))| ClipTiming::new(i as u32, t, a))
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_shortfall_absorbed_by_next_clip() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[5.0, 7.0, 6.0]), EPS);

        assert_eq!(plan.clips[0].decision, ClipDecision::Short);
        assert!(approx(plan.clips[0].debt_out(), 1.0));

        assert!(approx(plan.clips[1].extended_target, 7.0));
        assert!(approx(plan.clips[1].applied_duration, 7.0));
        assert_eq!(plan.clips[1].decision, ClipDecision::Trim { cut: false });

        assert_eq!(plan.clips[2].decision, ClipDecision::Keep);
        assert!(approx(plan.final_shortfall, 0.0));
        assert_eq!(plan.clips_trimmed(), 1);
        assert!(approx(plan.applied_total(), 18.0));

        let metrics = plan.metrics();
        assert_eq!(metrics.clips_trimmed, 1);
        assert_eq!(metrics.events.len(), 1);
        assert_eq!(metrics.events[0].index, 1);
        assert!(approx(metrics.events[0].compensation, 1.0));
    }

    #[test]
    fn test_debt_carries_through_short_clips() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[4.0, 4.0, 9.0]), EPS);

        assert!(approx(plan.clips[1].extended_target, 8.0));
        assert_eq!(plan.clips[1].decision, ClipDecision::Short);
        assert!(approx(plan.clips[2].extended_target, 10.0));
        assert_eq!(plan.clips[2].decision, ClipDecision::Short);
        assert!(approx(plan.final_shortfall, 1.0));
        assert_eq!(plan.clips_trimmed(), 0);

        let action = classify_shortfall(
            plan.final_shortfall,
            plan.intended_total(),
            &ShortfallThresholds::default(),
        );
        assert_eq!(action, ShortfallAction::Accept);
    }

    #[test]
    fn test_large_shortfall_fails() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[2.0, 3.0, 3.0]), EPS);
        assert!(approx(plan.final_shortfall, 10.0));

        let action = classify_shortfall(plan.final_shortfall, 18.0, &ShortfallThresholds::default());
        assert!(matches!(action, ShortfallAction::Fail { .. }));
    }

    #[test]
    fn test_all_long_clips_are_trimmed() {
        let plan = plan_compensation(&timings(&[6.0, 5.0, 4.0], &[6.5, 5.8, 4.9]), EPS);

        assert_eq!(plan.clips_trimmed(), 3);
        assert_eq!(plan.cuts_required(), 3);
        assert!(approx(plan.final_shortfall, 0.0));
        for clip in &plan.clips {
            assert!(approx(clip.applied_duration, clip.target));
        }
    }

    #[test]
    fn test_surplus_creates_no_credit() {
        // Clip 0 is long; clip 1 must still fall short on its own target
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[9.0, 5.0, 6.0]), EPS);

        assert!(approx(plan.clips[1].debt_in, 0.0));
        assert_eq!(plan.clips[1].decision, ClipDecision::Short);
        assert!(approx(plan.clips[2].extended_target, 7.0));
        assert!(approx(plan.final_shortfall, 1.0));
    }

    #[test]
    fn test_shortfall_never_negative() {
        let cases: &[&[f64]] = &[
            &[1.0, 1.0, 1.0],
            &[10.0, 10.0, 10.0],
            &[0.0, 12.0, 0.5],
            &[6.0, 0.0, 20.0],
            &[5.99, 6.01, 5.97, 6.03],
        ];
        for actuals in cases {
            let targets = vec![6.0; actuals.len()];
            let plan = plan_compensation(&timings(&targets, actuals), EPS);
            assert!(plan.final_shortfall >= 0.0, "actuals {:?}", actuals);
            assert!(plan.clips.iter().all(|c| c.debt_out() >= 0.0));
        }
    }

    #[test]
    fn test_reconciled_sequence_is_stable() {
        let targets = [6.0, 6.0, 6.0];
        for actuals in [[5.0, 7.0, 6.0], [6.4, 7.1, 6.2], [6.0, 6.0, 6.0]] {
            let first = plan_compensation(&timings(&targets, &actuals), EPS);
            assert!(approx(first.final_shortfall, 0.0));

            let applied: Vec<f64> = first.clips.iter().map(|c| c.applied_duration).collect();
            let second = plan_compensation(&timings(&targets, &applied), EPS);

            assert_eq!(second.cuts_required(), 0);
            assert!(approx(second.final_shortfall, 0.0));
        }
    }

    #[test]
    fn test_decisions_depend_only_on_prefix() {
        let targets = [6.0, 6.0, 6.0, 6.0, 6.0];
        let actuals = [4.5, 6.0, 8.0, 3.0, 7.0];
        let full = plan_compensation(&timings(&targets, &actuals), EPS);

        for keep in 1..targets.len() {
            let prefix = plan_compensation(&timings(&targets[..keep], &actuals[..keep]), EPS);
            assert_eq!(prefix.clips[..], full.clips[..keep]);
        }

        // Reordering the tail leaves the head untouched
        let reordered = [4.5, 6.0, 8.0, 7.0, 3.0];
        let other = plan_compensation(&timings(&targets, &reordered), EPS);
        assert_eq!(other.clips[..3], full.clips[..3]);
    }

    #[test]
    fn test_epsilon_absorbs_jitter() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[5.98, 6.02, 6.0]), EPS);

        assert_eq!(plan.cuts_required(), 0);
        assert_eq!(plan.clips_trimmed(), 0);
        assert!(approx(plan.final_shortfall, 0.0));
    }

    #[test]
    fn test_small_deficits_accumulate() {
        let targets = vec![6.0; 40];
        let actuals = vec![5.96; 40];
        let plan = plan_compensation(&timings(&targets, &actuals), EPS);

        assert_eq!(plan.cuts_required(), 0);
        assert!((plan.final_shortfall - 1.6).abs() < 1e-6);
        assert!(plan.final_shortfall >= plan.intended_total() - plan.applied_total() - 1e-9);
    }

    #[test]
    fn test_deficit_within_epsilon_reaches_classifier() {
        // Clip 0 is within a wide tolerance of its target, yet its deficit
        // still pushes the run into the extend band
        let targets = [6.0, 6.0, 6.0];
        let plan = plan_compensation(&timings(&targets, &[4.7, 4.7, 4.7]), 1.5);

        assert_eq!(plan.clips[0].decision, ClipDecision::Keep);
        assert!(approx(plan.clips[0].debt_out(), 1.3));
        assert!((plan.final_shortfall - 3.9).abs() < 1e-9);

        let action = classify_shortfall(
            plan.final_shortfall,
            plan.intended_total(),
            &ShortfallThresholds::default(),
        );
        assert!(matches!(action, ShortfallAction::Extend { deficit, .. } if (deficit - 3.9).abs() < 1e-9));
    }

    #[test]
    fn test_events_use_original_target() {
        let timings = vec![
            ClipTiming::new(0, 6.5, 5.5).with_original_target(6.0),
            ClipTiming::new(1, 6.5, 8.0).with_original_target(6.0),
            ClipTiming::new(2, 6.5, 6.5).with_original_target(6.0),
        ];
        let plan = plan_compensation(&timings, EPS);
        let metrics = plan.metrics();

        assert!(approx(plan.intended_total(), 18.0));
        assert_eq!(metrics.events[0].index, 1);
        assert!(approx(metrics.events[0].original_target, 6.0));
        assert!(approx(metrics.events[0].extended_target, 7.5));
    }

    #[test]
    fn test_classification_ranges() {
        let t = ShortfallThresholds::default();

        assert_eq!(classify_shortfall(0.0, 20.0, &t), ShortfallAction::Accept);
        assert_eq!(classify_shortfall(1.0, 20.0, &t), ShortfallAction::Accept);
        assert!(matches!(
            classify_shortfall(3.0, 20.0, &t),
            ShortfallAction::AcceptWithWarning { .. }
        ));
        assert!(matches!(
            classify_shortfall(4.0, 20.0, &t),
            ShortfallAction::Extend { deficit, .. } if approx(deficit, 4.0)
        ));
        assert!(matches!(
            classify_shortfall(10.0, 20.0, &t),
            ShortfallAction::Fail { .. }
        ));
    }

    #[test]
    fn test_extension_cap_fails_long_deficits() {
        let t = ShortfallThresholds::default();

        // 30% of 30s is 9s, over the 5s cap
        assert!(matches!(
            classify_shortfall(9.0, 30.0, &t),
            ShortfallAction::Fail { .. }
        ));
        // 25% of 16s is 4s, within the cap
        assert!(matches!(
            classify_shortfall(4.0, 16.0, &t),
            ShortfallAction::Extend { .. }
        ));
    }

    #[test]
    fn test_scenario_c_fails_on_ratio() {
        let action = classify_shortfall(10.0, 18.0, &ShortfallThresholds::default());
        match action {
            ShortfallAction::Fail { reason } => assert!(reason.contains("50%")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_apply_plan_requires_every_input() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[6.0, 6.0, 6.0]), EPS);
        let mut inputs = HashMap::new();
        inputs.insert(0, PathBuf::from("/w/0.mp4"));
        inputs.insert(1, PathBuf::from("/w/1.mp4"));

        let result = apply_plan(&plan, &inputs, Path::new("/w"), &FfmpegRunner::new()).await;
        assert!(matches!(result, Err(MediaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_apply_plan_passes_through_uncut_clips() {
        let plan = plan_compensation(&timings(&[6.0, 6.0, 6.0], &[5.0, 7.0, 6.0]), EPS);
        let inputs: HashMap<u32, PathBuf> = (0..3)
            .map(|i| (i, PathBuf::from(format!("/w/norm_{}.mp4", i))))
            .collect();

        let outputs = apply_plan(&plan, &inputs, Path::new("/w"), &FfmpegRunner::new())
            .await
            .unwrap();
        assert_eq!(
            outputs,
            vec![
                PathBuf::from("/w/norm_0.mp4"),
                PathBuf::from("/w/norm_1.mp4"),
                PathBuf::from("/w/norm_2.mp4"),
            ]
        );
    }
}
