//! Shared data models for the music-video composer.
//!
//! This crate provides Serde-serializable types for:
//! - Generated clips and clip collections
//! - Transition plans between adjacent clips
//! - Output aspect ratios and the canonical encoding profile
//! - Composition requests, results and compensation metrics
//! - Progress events published while a composition runs

pub mod aspect;
pub mod clip;
pub mod composition;
pub mod encoding;
pub mod progress;
pub mod transition;

// Re-export common types
pub use aspect::{AspectRatio, AspectRatioParseError};
pub use clip::{Clip, ClipCollection, ClipStatus, MIN_CLIPS_TO_COMPOSE};
pub use composition::{
    CompensationEvent, CompensationMetrics, CompositionRequest, CompositionStatus, VideoOutput,
};
pub use encoding::EncodingProfile;
pub use progress::{CompositionStage, ProgressEvent};
pub use transition::{ResolvedTransition, Transition, TransitionPlan, TransitionType};
