//! Composition stages and progress events.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Event type for stage progress updates.
pub const EVENT_PROGRESS: &str = "composition_progress";
/// Event type for the terminal failure event.
pub const EVENT_FAILED: &str = "composition_failed";
/// Event type for the terminal success event.
pub const EVENT_COMPLETED: &str = "composition_completed";

/// Top-level composition pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompositionStage {
    Validating,
    Downloading,
    Normalizing,
    ReconcilingDurations,
    ApplyingTransitions,
    Padding,
    SyncingAudio,
    Encoding,
    Uploading,
    Completed,
    Failed,
}

impl CompositionStage {
    /// Working stages in execution order.
    pub const PIPELINE: [CompositionStage; 9] = [
        CompositionStage::Validating,
        CompositionStage::Downloading,
        CompositionStage::Normalizing,
        CompositionStage::ReconcilingDurations,
        CompositionStage::ApplyingTransitions,
        CompositionStage::Padding,
        CompositionStage::SyncingAudio,
        CompositionStage::Encoding,
        CompositionStage::Uploading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompositionStage::Validating => "validating",
            CompositionStage::Downloading => "downloading",
            CompositionStage::Normalizing => "normalizing",
            CompositionStage::ReconcilingDurations => "reconciling_durations",
            CompositionStage::ApplyingTransitions => "applying_transitions",
            CompositionStage::Padding => "padding",
            CompositionStage::SyncingAudio => "syncing_audio",
            CompositionStage::Encoding => "encoding",
            CompositionStage::Uploading => "uploading",
            CompositionStage::Completed => "completed",
            CompositionStage::Failed => "failed",
        }
    }

    /// Fraction of the composer's progress span covered by this stage.
    ///
    /// Ranges are contiguous and increase in pipeline order.
    pub fn progress_range(&self) -> (f64, f64) {
        match self {
            CompositionStage::Validating => (0.00, 0.02),
            CompositionStage::Downloading => (0.02, 0.20),
            CompositionStage::Normalizing => (0.20, 0.40),
            CompositionStage::ReconcilingDurations => (0.40, 0.50),
            CompositionStage::ApplyingTransitions => (0.50, 0.62),
            CompositionStage::Padding => (0.62, 0.68),
            CompositionStage::SyncingAudio => (0.68, 0.76),
            CompositionStage::Encoding => (0.76, 0.88),
            CompositionStage::Uploading => (0.88, 1.00),
            CompositionStage::Completed => (1.00, 1.00),
            CompositionStage::Failed => (0.00, 0.00),
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompositionStage::Completed | CompositionStage::Failed)
    }
}

impl fmt::Display for CompositionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress update published while a composition runs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub stage: CompositionStage,
    pub message: String,
    /// Overall percentage on the caller's 0-100 scale
    pub percentage: f64,
    /// Seconds spent in the current stage so far
    pub elapsed_secs: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        stage: CompositionStage,
        message: impl Into<String>,
        percentage: f64,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            stage,
            message: message.into(),
            percentage,
            elapsed_secs,
            timestamp: Utc::now(),
        }
    }
}
