//! Prometheus metrics for compositions.

use metrics::{counter, histogram};

use muse_models::CompositionStage;

/// Metric names as constants for consistency.
pub mod names {
    pub const COMPOSITIONS_TOTAL: &str = "muse_compositions_total";
    pub const STAGE_DURATION_SECONDS: &str = "muse_stage_duration_seconds";
    pub const CLIPS_TRIMMED_TOTAL: &str = "muse_clips_trimmed_total";
    pub const SYNC_DRIFT_SECONDS: &str = "muse_sync_drift_seconds";
    pub const TRANSITION_FALLBACKS_TOTAL: &str = "muse_transition_fallbacks_total";
}

/// Record a finished composition.
pub fn record_composition(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::COMPOSITIONS_TOTAL, &labels).increment(1);
}

/// Record time spent in one stage.
pub fn record_stage_duration(stage: CompositionStage, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_clips_trimmed(count: u32) {
    counter!(names::CLIPS_TRIMMED_TOTAL).increment(u64::from(count));
}

pub fn record_sync_drift(drift_secs: f64) {
    histogram!(names::SYNC_DRIFT_SECONDS).record(drift_secs);
}

pub fn record_transition_fallback(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::TRANSITION_FALLBACKS_TOTAL, &labels).increment(1);
}
