#![deny(unreachable_patterns)]
//! FFmpeg CLI layer for music-video composition.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and a runner with timeout and retry
//! - Progress parsing from `-progress pipe:2`
//! - Strict and fallback probing
//! - The composition stages: normalize, reconcile, extend, join, pad, sync
//!   and encode

pub mod command;
pub mod concat;
pub mod encode;
pub mod error;
pub mod extend;
pub mod normalize;
pub mod pad;
pub mod probe;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod sync;
pub mod thumbnail;
pub mod transitions;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use concat::concat_stream_copy;
pub use encode::{encode_final, validate_output, EncodedVideo, MIN_OUTPUT_BYTES};
pub use error::{MediaError, MediaResult};
pub use extend::{extend_last_clip, plan_extension, ExtendedClip, ExtensionLimits, ExtensionStrategy};
pub use normalize::{normalize_clip, NormalizedClip};
pub use pad::{pad_video_to_audio, PaddedVideo};
pub use probe::{probe_duration, probe_duration_or, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use reconcile::{
    apply_plan, classify_shortfall, plan_compensation, ClipDecision, ClipTiming,
    CompensationPlan, PlannedClip, ShortfallAction, ShortfallThresholds,
};
pub use retry::{retry_async, retry_async_if, RetryConfig};
pub use sync::{sync_audio, SyncedVideo};
pub use thumbnail::{generate_thumbnail, try_generate_thumbnail};
pub use transitions::{
    compose_transitions, ComposedVideo, FallbackReason, SequenceClip, TransitionSettings,
};
