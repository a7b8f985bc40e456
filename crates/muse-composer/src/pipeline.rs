//! Composition driver.
//!
//! Runs one [`CompositionRequest`] through the fixed stage sequence:
//! validate, download, normalize, reconcile durations, join with
//! transitions, pad, sync audio, encode and upload. Every run gets its own
//! [`Workspace`], removed on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn, Instrument};

use muse_media::reconcile::ClipTiming;
use muse_media::{
    apply_plan, classify_shortfall, compose_transitions, encode_final, extend_last_clip,
    normalize_clip, pad_video_to_audio, plan_compensation, probe_duration, sync_audio,
    try_generate_thumbnail, CompensationPlan, FallbackReason, FfmpegRunner, NormalizedClip,
    SequenceClip, ShortfallAction, ShortfallThresholds,
};
use muse_models::{
    AspectRatio, Clip, CompositionRequest, CompositionStage, CompositionStatus, EncodingProfile,
    TransitionPlan, VideoOutput, MIN_CLIPS_TO_COMPOSE,
};
use muse_storage::ArtifactStore;

use crate::config::ComposerConfig;
use crate::error::{ComposeError, ComposeResult, ResultExt};
use crate::events::{EventPublisher, ProgressReporter};
use crate::fetcher::{ClipFetcher, FetchedMedia};
use crate::logging::JobLogger;
use crate::metrics;
use crate::uploader::Uploader;
use crate::workspace::Workspace;

/// Composes clip collections into finished music videos.
pub struct CompositionDriver {
    config: ComposerConfig,
    runner: FfmpegRunner,
    fetcher: ClipFetcher,
    uploader: Uploader,
    publisher: EventPublisher,
}

/// Timeline after reconciliation and optional extension.
struct ReconciledTimeline {
    clips: Vec<SequenceClip>,
    plan: CompensationPlan,
    clips_looped: u32,
}

/// Follow-up the shortfall left after the cascade calls for.
#[derive(Debug, Clone, PartialEq)]
enum ShortfallResolution {
    Proceed,
    /// Proceed; padding covers the gap.
    Warn { shortfall_pct: f64 },
    /// Lengthen clip `index`, the last in the sequence, by `deficit` seconds.
    ExtendLast {
        index: u32,
        deficit: f64,
        shortfall_pct: f64,
    },
}

impl CompositionDriver {
    /// Build a driver. Fails on an invalid configuration.
    pub fn new(
        config: ComposerConfig,
        store: Arc<dyn ArtifactStore>,
        publisher: EventPublisher,
    ) -> ComposeResult<Self> {
        config.validate()?;

        let fetcher = ClipFetcher::new(config.download_timeout)
            .map_err(|e| ComposeError::config(e.to_string()))?;
        let uploader = Uploader::new(store, config.upload_heartbeat);

        Ok(Self {
            runner: config.runner(),
            fetcher,
            uploader,
            publisher,
            config,
        })
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Compose `request` into one uploaded video.
    ///
    /// Publishes progress while running and exactly one terminal event.
    pub async fn compose(&self, request: &CompositionRequest) -> ComposeResult<VideoOutput> {
        let logger = JobLogger::new(&request.job_id, "compose");
        let reporter = Arc::new(ProgressReporter::new(
            Arc::clone(&self.publisher),
            request.job_id.clone(),
            self.config.progress_base,
            self.config.progress_span,
        ));

        logger.log_start(&format!("{} clips", request.clips.len()));

        let result = self
            .run(request, &reporter, &logger)
            .instrument(logger.create_span())
            .await;

        match &result {
            Ok(output) => {
                metrics::record_composition("completed");
                reporter.completed(output);
                logger.log_completion(&format!(
                    "{:.2}s video in {:.1}s",
                    output.duration, output.composition_time
                ));
            }
            Err(e) => {
                metrics::record_composition("failed");
                reporter.failed(e);
                logger.log_error(e.stage(), e.clip_index(), &e.to_string());
            }
        }

        result
    }

    async fn run(
        &self,
        request: &CompositionRequest,
        reporter: &Arc<ProgressReporter>,
        logger: &JobLogger,
    ) -> ComposeResult<VideoOutput> {
        reporter.stage(CompositionStage::Validating, "Validating request");
        let workspace = Workspace::create(&self.config.work_dir, &request.job_id)
            .await
            .in_stage(CompositionStage::Validating, None)?;

        let result = self
            .run_in(&workspace, request, reporter, logger)
            .await;

        if let Err(e) = workspace.cleanup().await {
            warn!(error = %e, "Failed to remove workspace");
        }

        result
    }

    async fn run_in(
        &self,
        workspace: &Workspace,
        request: &CompositionRequest,
        reporter: &Arc<ProgressReporter>,
        logger: &JobLogger,
    ) -> ComposeResult<VideoOutput> {
        let started = Instant::now();
        let audio_location = validate_request(request)?;
        let clips = &request.clips.clips;
        let profile = self.output_profile(request.aspect_ratio.as_deref());
        self.finish_stage(logger, CompositionStage::Validating, started, "request accepted");

        // Downloading
        let started = Instant::now();
        reporter.stage(
            CompositionStage::Downloading,
            format!("Downloading {} clips and audio", clips.len()),
        );
        let downloads = workspace
            .subdir("downloads")
            .await
            .in_stage(CompositionStage::Downloading, None)?;
        let media = self
            .fetcher
            .fetch_all(clips, audio_location, &downloads)
            .await?;
        let audio_duration = self.audio_duration(&media, request).await;
        self.finish_stage(logger, CompositionStage::Downloading, started, "payloads fetched");

        // Normalizing
        let started = Instant::now();
        reporter.stage(CompositionStage::Normalizing, "Normalizing clips");
        let normalized = self
            .normalize_all(clips, &media, workspace, &profile, reporter)
            .await?;
        self.finish_stage(logger, CompositionStage::Normalizing, started, "clips normalized");

        // ReconcilingDurations
        let started = Instant::now();
        reporter.stage(
            CompositionStage::ReconcilingDurations,
            "Reconciling clip durations",
        );
        let timeline = self
            .reconcile(clips, &normalized, workspace, &profile, logger)
            .await?;
        self.finish_stage(
            logger,
            CompositionStage::ReconcilingDurations,
            started,
            &format!(
                "{} clips trimmed, {:.3}s shortfall",
                timeline.plan.clips_trimmed(),
                timeline.plan.final_shortfall
            ),
        );

        // ApplyingTransitions
        let started = Instant::now();
        reporter.stage(CompositionStage::ApplyingTransitions, "Joining clips");
        let plan = TransitionPlan::resolve(
            timeline.clips.len(),
            request.transitions.as_deref().unwrap_or_default(),
            self.config.transitions.max_transition_secs,
        );
        let composed = compose_transitions(
            &timeline.clips,
            &plan,
            request.beat_times.as_deref(),
            &self.config.transitions,
            workspace.path(),
            &profile,
            &self.runner,
        )
        .await
        .in_stage(CompositionStage::ApplyingTransitions, None)?;
        if let Some(reason) = &composed.fallback {
            metrics::record_transition_fallback(fallback_label(reason));
            logger.log_warning(&format!("Dissolves dropped, hard cuts used: {}", reason));
        }
        self.finish_stage(
            logger,
            CompositionStage::ApplyingTransitions,
            started,
            &format!("{} transitions applied", composed.transitions_applied),
        );

        // Padding
        let started = Instant::now();
        reporter.stage(CompositionStage::Padding, "Matching video to audio length");
        let padded = pad_video_to_audio(
            &composed.path,
            audio_duration,
            workspace.path(),
            &profile,
            &self.runner,
        )
        .await
        .in_stage(CompositionStage::Padding, None)?;
        self.finish_stage(
            logger,
            CompositionStage::Padding,
            started,
            &format!("{:.3}s padded", padded.padded_secs),
        );

        // SyncingAudio
        let started = Instant::now();
        reporter.stage(CompositionStage::SyncingAudio, "Muxing audio");
        let synced = sync_audio(
            &padded.path,
            &media.audio.path,
            audio_duration,
            &workspace.join("synced.mp4"),
            &profile,
            &self.runner,
        )
        .await
        .in_stage(CompositionStage::SyncingAudio, None)?;
        self.finish_stage(
            logger,
            CompositionStage::SyncingAudio,
            started,
            &format!("drift {:.3}s", synced.sync_drift),
        );

        // Encoding
        let started = Instant::now();
        reporter.stage(CompositionStage::Encoding, "Encoding final video");
        let encode_reporter = Arc::clone(reporter);
        let encoded = encode_final(
            &synced.path,
            &workspace.join("final.mp4"),
            &profile,
            synced.duration,
            &self.runner,
            move |fraction| {
                encode_reporter.stage_progress(
                    CompositionStage::Encoding,
                    fraction,
                    format!("Encoding final video ({:.0}%)", fraction * 100.0),
                );
            },
        )
        .await
        .in_stage(CompositionStage::Encoding, None)?;
        let thumbnail = try_generate_thumbnail(
            &encoded.path,
            &workspace.join("thumbnail.jpg"),
            encoded.duration,
            &self.runner,
        )
        .await;
        self.finish_stage(
            logger,
            CompositionStage::Encoding,
            started,
            &format!("{} bytes", encoded.file_size),
        );

        // Uploading
        let started = Instant::now();
        reporter.stage(CompositionStage::Uploading, "Uploading video");
        let uploaded = self
            .uploader
            .upload(&request.job_id, &encoded.path, thumbnail.as_deref(), reporter)
            .await?;
        self.finish_stage(logger, CompositionStage::Uploading, started, &uploaded.key);

        let sync_drift = (encoded.duration - audio_duration).abs();
        metrics::record_sync_drift(sync_drift);

        Ok(VideoOutput {
            location: uploaded.location,
            storage_key: uploaded.key,
            duration: encoded.duration,
            audio_duration,
            sync_drift,
            clips_used: timeline.clips.len() as u32,
            clips_trimmed: timeline.plan.clips_trimmed(),
            clips_looped: timeline.clips_looped,
            compensation: timeline.plan.metrics(),
            transitions_applied: composed.transitions_applied,
            file_size: encoded.file_size,
            composition_time: reporter.run_elapsed(),
            cost: 0.0,
            status: CompositionStatus::Completed,
            thumbnail_location: uploaded.thumbnail_location,
            created_at: Utc::now(),
        })
    }

    /// Canonical profile resized to the requested aspect ratio.
    fn output_profile(&self, aspect_ratio: Option<&str>) -> EncodingProfile {
        let base = &self.config.encoding;
        let (width, height) =
            AspectRatio::parse_or_default(aspect_ratio).dimensions(base.width, base.height);
        base.clone().with_dimensions(width, height)
    }

    /// Measured audio length, or the planned timeline length when the
    /// track cannot be probed.
    async fn audio_duration(&self, media: &FetchedMedia, request: &CompositionRequest) -> f64 {
        match probe_duration(&media.audio.path).await {
            Ok(duration) if duration > 0.0 => duration,
            Ok(_) | Err(_) => {
                let estimate = request.clips.total_intended_duration();
                warn!(
                    estimate,
                    "Audio duration unavailable, using intended timeline length"
                );
                estimate
            }
        }
    }

    async fn normalize_all(
        &self,
        clips: &[Clip],
        media: &FetchedMedia,
        workspace: &Workspace,
        profile: &EncodingProfile,
        reporter: &ProgressReporter,
    ) -> ComposeResult<HashMap<u32, NormalizedClip>> {
        let stage = CompositionStage::Normalizing;
        let out_dir = workspace.subdir("normalized").await.in_stage(stage, None)?;
        let total = clips.len();
        let done = AtomicUsize::new(0);

        let jobs = clips.iter().map(|clip| {
            let out_dir = &out_dir;
            let done = &done;
            async move {
                let input = media.clips.get(&clip.index).ok_or_else(|| {
                    ComposeError::permanent(stage, Some(clip.index), "clip was not downloaded")
                })?;
                let output = out_dir.join(format!("clip_{:03}.mp4", clip.index));
                let normalized = normalize_clip(
                    clip.index,
                    &input.path,
                    &output,
                    clip.actual_duration,
                    profile,
                    &self.runner,
                )
                .await
                .in_stage(stage, Some(clip.index))?;

                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.stage_progress(
                    stage,
                    finished as f64 / total as f64,
                    format!("Normalized {}/{} clips", finished, total),
                );
                Ok::<_, ComposeError>((clip.index, normalized))
            }
        });

        join_all(jobs).await.into_iter().collect()
    }

    async fn reconcile(
        &self,
        clips: &[Clip],
        normalized: &HashMap<u32, NormalizedClip>,
        workspace: &Workspace,
        profile: &EncodingProfile,
        logger: &JobLogger,
    ) -> ComposeResult<ReconciledTimeline> {
        let stage = CompositionStage::ReconcilingDurations;

        let mut timings = Vec::with_capacity(clips.len());
        let mut inputs = HashMap::with_capacity(clips.len());
        for clip in clips {
            let n = normalized.get(&clip.index).ok_or_else(|| {
                ComposeError::permanent(stage, Some(clip.index), "clip was not normalized")
            })?;
            let intended = clip.intended_duration();
            timings.push(ClipTiming::new(clip.index, intended, n.duration).with_original_target(intended));
            inputs.insert(clip.index, n.path.clone());
        }

        let plan = plan_compensation(&timings, self.config.duration_epsilon);
        metrics::record_clips_trimmed(plan.clips_trimmed());

        let reconciled_dir = workspace.subdir("reconciled").await.in_stage(stage, None)?;
        let paths = apply_plan(&plan, &inputs, &reconciled_dir, &self.runner)
            .await
            .in_stage(stage, None)?;

        let mut sequence: Vec<SequenceClip> = plan
            .clips
            .iter()
            .zip(paths)
            .map(|(planned, path)| SequenceClip {
                path,
                duration: planned.applied_duration,
            })
            .collect();

        let mut clips_looped = 0;

        match resolve_shortfall(&plan, &self.config.thresholds)? {
            ShortfallResolution::Proceed => {}
            ShortfallResolution::Warn { shortfall_pct } => {
                logger.log_warning(&format!(
                    "Accepting {:.3}s shortfall ({:.1}%), padding will cover it",
                    plan.final_shortfall,
                    shortfall_pct * 100.0
                ));
            }
            ShortfallResolution::ExtendLast {
                index,
                deficit,
                shortfall_pct,
            } => {
                let last = sequence.last_mut().ok_or_else(|| {
                    ComposeError::permanent(stage, None, "no clips left to extend")
                })?;
                info!(
                    index,
                    deficit,
                    shortfall_pct,
                    clip_duration = last.duration,
                    "Extending last clip"
                );
                let extended = extend_last_clip(
                    &last.path,
                    last.duration,
                    deficit,
                    &self.config.extension_limits(),
                    workspace.path(),
                    profile,
                    &self.runner,
                )
                .await
                .in_stage(stage, Some(index))?;

                last.path = extended.path;
                last.duration = extended.duration;
                // Counts clips, not repetitions
                clips_looped = u32::from(extended.loops > 0);
            }
        }

        Ok(ReconciledTimeline {
            clips: sequence,
            plan,
            clips_looped,
        })
    }

    fn finish_stage(
        &self,
        logger: &JobLogger,
        stage: CompositionStage,
        started: Instant,
        message: &str,
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_stage_duration(stage, elapsed);
        logger.log_stage(stage, elapsed, message);
    }
}

/// Check the request shape. Returns the audio location.
fn validate_request(request: &CompositionRequest) -> ComposeResult<&str> {
    let stage = CompositionStage::Validating;
    let clips = &request.clips;

    if clips.len() < MIN_CLIPS_TO_COMPOSE {
        return Err(ComposeError::permanent(
            stage,
            None,
            format!(
                "need at least {} clips, got {}",
                MIN_CLIPS_TO_COMPOSE,
                clips.len()
            ),
        ));
    }

    if let Some(clip) = clips.iter().find(|c| !c.is_usable()) {
        return Err(ComposeError::permanent(
            stage,
            Some(clip.index),
            format!(
                "clip is not usable (status {}, location {})",
                clip.status.as_str(),
                if clip.location.is_some() { "present" } else { "missing" }
            ),
        ));
    }

    if !clips.has_contiguous_indices() {
        return Err(ComposeError::permanent(
            stage,
            None,
            "clip indices must run 0..n without gaps",
        ));
    }

    match request.audio_url.as_deref().map(str::trim) {
        Some(location) if !location.is_empty() => Ok(location),
        _ => Err(ComposeError::permanent(stage, None, "audio location is missing")),
    }
}

/// Decide what the shortfall after the cascade requires.
fn resolve_shortfall(
    plan: &CompensationPlan,
    thresholds: &ShortfallThresholds,
) -> ComposeResult<ShortfallResolution> {
    let stage = CompositionStage::ReconcilingDurations;
    match classify_shortfall(plan.final_shortfall, plan.intended_total(), thresholds) {
        ShortfallAction::Accept => Ok(ShortfallResolution::Proceed),
        ShortfallAction::AcceptWithWarning { shortfall_pct } => {
            Ok(ShortfallResolution::Warn { shortfall_pct })
        }
        ShortfallAction::Extend {
            deficit,
            shortfall_pct,
        } => {
            let last = plan.clips.last().ok_or_else(|| {
                ComposeError::permanent(stage, None, "no clips left to extend")
            })?;
            Ok(ShortfallResolution::ExtendLast {
                index: last.index,
                deficit,
                shortfall_pct,
            })
        }
        ShortfallAction::Fail { reason } => Err(ComposeError::permanent(stage, None, reason)),
    }
}

fn fallback_label(reason: &FallbackReason) -> &'static str {
    match reason {
        FallbackReason::TooManyClips { .. } => "too_many_clips",
        FallbackReason::ClipTooShort { .. } => "clip_too_short",
        FallbackReason::XfadeFailed(_) => "xfade_failed",
    }
}
