//! Composition request and result models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ClipCollection, Transition};

/// Input to a single composition run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompositionRequest {
    /// Job the composition belongs to (used for workspace and storage paths)
    pub job_id: String,

    pub clips: ClipCollection,

    /// Location of the audio track
    #[serde(default)]
    pub audio_url: Option<String>,

    /// Beat timestamps in seconds from the audio analyzer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_times: Option<Vec<f64>>,

    /// Transition plan from the scene planner
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<Transition>>,

    /// Requested aspect ratio ("16:9", "9:16", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
}

/// One clip that absorbed cascaded duration debt or was shortened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompensationEvent {
    pub index: u32,
    /// Target before any debt was added
    pub original_target: f64,
    /// Target including the debt carried into this clip
    pub extended_target: f64,
    /// Debt absorbed by this clip in seconds
    pub compensation: f64,
}

/// Outcome of duration reconciliation for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompensationMetrics {
    pub clips_trimmed: u32,
    /// Debt left after the last clip, in seconds
    pub cumulative_shortfall: f64,
    pub events: Vec<CompensationEvent>,
}

/// Terminal status of a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStatus {
    #[default]
    Completed,
    Failed,
}

/// Final composed video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoOutput {
    /// Public or presigned URL of the uploaded video
    pub location: String,
    /// Storage key the video was uploaded under
    pub storage_key: String,
    /// Measured duration of the final file in seconds
    pub duration: f64,
    pub audio_duration: f64,
    /// |final duration - audio duration|
    pub sync_drift: f64,
    pub clips_used: u32,
    pub clips_trimmed: u32,
    /// Number of loop repetitions used to extend the last clip
    pub clips_looped: u32,
    pub compensation: CompensationMetrics,
    pub transitions_applied: u32,
    pub file_size: u64,
    /// Wall-clock composition time in seconds
    pub composition_time: f64,
    /// Composition runs locally and is always free
    pub cost: f64,
    pub status: CompositionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_minimal() {
        let json = r#"{
            "job_id": "job-1",
            "clips": {"clips": [
                {"index": 0, "location": "a.mp4", "status": "success", "actual_duration": 6.0, "target_duration": 6.0}
            ]},
            "audio_url": "https://cdn/audio.mp3"
        }"#;
        let request: CompositionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.clips.len(), 1);
        assert!(request.transitions.is_none());
        assert!(request.beat_times.is_none());
    }

    #[test]
    fn test_metrics_default_is_empty() {
        let metrics = CompensationMetrics::default();
        assert_eq!(metrics.clips_trimmed, 0);
        assert_eq!(metrics.cumulative_shortfall, 0.0);
        assert!(metrics.events.is_empty());
    }
}
