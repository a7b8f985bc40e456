//! Generated clip models.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Minimum number of successful clips needed to compose a video.
pub const MIN_CLIPS_TO_COMPOSE: usize = 3;

/// Generation status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipStatus {
    /// Waiting for the generator
    #[default]
    Pending,
    /// Generation in progress
    Generating,
    /// Clip generated and stored
    Success,
    /// Generation failed
    Failed,
}

impl ClipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipStatus::Pending => "pending",
            ClipStatus::Generating => "generating",
            ClipStatus::Success => "success",
            ClipStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ClipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One independently generated video segment covering a slice of the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    /// Position on the timeline (0-based)
    pub index: u32,

    /// Where the generated video lives (URL or local path)
    #[serde(default)]
    pub location: Option<String>,

    /// Generation status
    #[serde(default)]
    pub status: ClipStatus,

    /// Measured duration in seconds
    pub actual_duration: f64,

    /// Duration the generator was asked for, in seconds
    pub target_duration: f64,

    /// Planned duration before the generator buffer was added
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_target_duration: Option<f64>,

    /// Generation cost
    #[serde(default)]
    pub cost: f64,

    /// Number of regeneration attempts
    #[serde(default)]
    pub retry_count: u32,

    /// Wall-clock generation time in seconds
    #[serde(default)]
    pub generation_time: f64,

    /// Free-form generator metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Clip {
    /// Create a successful clip with the given durations.
    pub fn new(index: u32, location: impl Into<String>, target: f64, actual: f64) -> Self {
        Self {
            index,
            location: Some(location.into()),
            status: ClipStatus::Success,
            actual_duration: actual,
            target_duration: target,
            original_target_duration: None,
            cost: 0.0,
            retry_count: 0,
            generation_time: 0.0,
            metadata: HashMap::new(),
        }
    }

    /// Length the timeline wants this clip to fill.
    ///
    /// Generators are often asked for a buffered target; the pre-buffer value
    /// is the one the audio track was planned against.
    pub fn intended_duration(&self) -> f64 {
        self.original_target_duration.unwrap_or(self.target_duration)
    }

    /// Whether the clip can be fed into a composition.
    pub fn is_usable(&self) -> bool {
        self.status == ClipStatus::Success
            && self
                .location
                .as_deref()
                .map(|l| !l.trim().is_empty())
                .unwrap_or(false)
    }
}

/// Ordered collection of clips plus aggregate totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ClipCollection {
    pub clips: Vec<Clip>,
}

impl ClipCollection {
    /// Create a collection, ordering clips by index.
    pub fn new(mut clips: Vec<Clip>) -> Self {
        clips.sort_by_key(|c| c.index);
        Self { clips }
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Clip> {
        self.clips.iter()
    }

    pub fn total_actual_duration(&self) -> f64 {
        self.clips.iter().map(|c| c.actual_duration).sum()
    }

    pub fn total_target_duration(&self) -> f64 {
        self.clips.iter().map(|c| c.target_duration).sum()
    }

    pub fn total_intended_duration(&self) -> f64 {
        self.clips.iter().map(Clip::intended_duration).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.clips.iter().map(|c| c.cost).sum()
    }

    pub fn successful_count(&self) -> usize {
        self.clips
            .iter()
            .filter(|c| c.status == ClipStatus::Success)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.clips
            .iter()
            .filter(|c| c.status == ClipStatus::Failed)
            .count()
    }

    /// Copy of the collection with only usable clips, renumbered 0..n.
    ///
    /// Ordering follows the original indices.
    pub fn successful_reindexed(&self) -> ClipCollection {
        let mut clips: Vec<Clip> = self
            .clips
            .iter()
            .filter(|c| c.is_usable())
            .cloned()
            .collect();
        clips.sort_by_key(|c| c.index);
        for (i, clip) in clips.iter_mut().enumerate() {
            clip.index = i as u32;
        }
        ClipCollection { clips }
    }

    /// Whether indices are unique and contiguous from zero.
    pub fn has_contiguous_indices(&self) -> bool {
        self.clips
            .iter()
            .enumerate()
            .all(|(i, c)| c.index as usize == i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_orders_by_index() {
        let collection = ClipCollection::new(vec![
            Clip::new(2, "c.mp4", 6.0, 6.0),
            Clip::new(0, "a.mp4", 6.0, 5.0),
            Clip::new(1, "b.mp4", 6.0, 7.0),
        ]);

        let indices: Vec<u32> = collection.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!((collection.total_actual_duration() - 18.0).abs() < 1e-9);
        assert!((collection.total_target_duration() - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_successful_reindexed_drops_failed_clips() {
        let mut failed = Clip::new(1, "b.mp4", 6.0, 0.0);
        failed.status = ClipStatus::Failed;

        let collection = ClipCollection::new(vec![
            Clip::new(0, "a.mp4", 6.0, 6.0),
            failed,
            Clip::new(2, "c.mp4", 6.0, 6.0),
            Clip::new(3, "d.mp4", 6.0, 6.0),
        ]);

        let reindexed = collection.successful_reindexed();
        assert_eq!(reindexed.len(), 3);
        assert!(reindexed.has_contiguous_indices());
        assert_eq!(reindexed.clips[1].location.as_deref(), Some("c.mp4"));
        assert_eq!(collection.failed_count(), 1);
    }

    #[test]
    fn test_intended_duration_prefers_pre_buffer_target() {
        let mut clip = Clip::new(0, "a.mp4", 6.5, 6.4);
        assert!((clip.intended_duration() - 6.5).abs() < 1e-9);

        clip.original_target_duration = Some(6.0);
        assert!((clip.intended_duration() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_clip_usable_requires_location_and_success() {
        let mut clip = Clip::new(0, "a.mp4", 6.0, 6.0);
        assert!(clip.is_usable());

        clip.location = Some("  ".to_string());
        assert!(!clip.is_usable());

        clip.location = Some("a.mp4".to_string());
        clip.status = ClipStatus::Generating;
        assert!(!clip.is_usable());
    }

    #[test]
    fn test_clip_deserializes_with_defaults() {
        let json = r#"{"index": 0, "location": "https://cdn/x.mp4", "status": "success",
                       "actual_duration": 5.9, "target_duration": 6.0}"#;
        let clip: Clip = serde_json::from_str(json).unwrap();
        assert_eq!(clip.status, ClipStatus::Success);
        assert!(clip.original_target_duration.is_none());
        assert!(clip.metadata.is_empty());
    }
}
