//! Progress publishing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use muse_models::progress::{EVENT_COMPLETED, EVENT_FAILED, EVENT_PROGRESS};
use muse_models::{CompositionStage, ProgressEvent, VideoOutput};

use crate::error::ComposeError;

/// Callback receiving `(event_type, payload)`.
///
/// Called synchronously from the pipeline; implementations should hand the
/// event off rather than block.
pub type EventPublisher = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Publisher that drops every event.
pub fn noop_publisher() -> EventPublisher {
    Arc::new(|_, _| {})
}

/// Publisher that forwards events to the log.
pub fn tracing_publisher() -> EventPublisher {
    Arc::new(|event_type, payload| {
        tracing::info!(event_type, payload = %payload, "Composition event");
    })
}

/// Maps stage progress onto the caller's percentage scale.
pub struct ProgressReporter {
    publisher: EventPublisher,
    job_id: String,
    base: f64,
    span: f64,
    /// Highest percentage published, as `f64` bits
    high_water: AtomicU64,
    stage_started: std::sync::Mutex<Instant>,
    run_started: Instant,
}

impl ProgressReporter {
    pub fn new(publisher: EventPublisher, job_id: impl Into<String>, base: f64, span: f64) -> Self {
        let now = Instant::now();
        Self {
            publisher,
            job_id: job_id.into(),
            base,
            span,
            high_water: AtomicU64::new(base.to_bits()),
            stage_started: std::sync::Mutex::new(now),
            run_started: now,
        }
    }

    /// Percentage for `fraction` of the way through `stage`.
    pub fn percentage(&self, stage: CompositionStage, fraction: f64) -> f64 {
        let (start, end) = stage.progress_range();
        let within = start + (end - start) * fraction.clamp(0.0, 1.0);
        self.base + self.span * within
    }

    /// Announce the start of `stage`.
    pub fn stage(&self, stage: CompositionStage, message: impl Into<String>) {
        if let Ok(mut started) = self.stage_started.lock() {
            *started = Instant::now();
        }
        self.stage_progress(stage, 0.0, message);
    }

    /// Report progress inside `stage`. Never moves backwards.
    pub fn stage_progress(&self, stage: CompositionStage, fraction: f64, message: impl Into<String>) {
        let pct = self.monotonic(self.percentage(stage, fraction));
        let event = ProgressEvent::new(stage, message, pct, self.stage_elapsed());
        debug!(stage = %stage, percentage = pct, "Publishing progress");
        self.publish(EVENT_PROGRESS, &event);
    }

    /// Publish the terminal failure event.
    pub fn failed(&self, error: &ComposeError) {
        let payload = json!({
            "job_id": self.job_id,
            "stage": error.stage(),
            "clip_index": error.clip_index(),
            "error": error.to_string(),
            "retryable": error.is_retryable(),
            "elapsed_secs": self.run_elapsed(),
        });
        (self.publisher)(EVENT_FAILED, payload);
    }

    /// Publish the terminal success event.
    pub fn completed(&self, output: &VideoOutput) {
        let end = self.base + self.span;
        self.high_water.fetch_max(end.to_bits(), Ordering::Relaxed);
        let payload = json!({
            "job_id": self.job_id,
            "stage": CompositionStage::Completed,
            "percentage": end,
            "output": output,
        });
        (self.publisher)(EVENT_COMPLETED, payload);
    }

    pub fn run_elapsed(&self) -> f64 {
        self.run_started.elapsed().as_secs_f64()
    }

    fn stage_elapsed(&self) -> f64 {
        self.stage_started
            .lock()
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or_default()
    }

    // Non-negative floats order the same way as their bit patterns
    fn monotonic(&self, pct: f64) -> f64 {
        let pct = pct.max(0.0);
        let previous = self.high_water.fetch_max(pct.to_bits(), Ordering::Relaxed);
        pct.max(f64::from_bits(previous))
    }

    fn publish(&self, event_type: &str, event: &ProgressEvent) {
        let mut payload = serde_json::to_value(event).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.insert("job_id".to_string(), Value::String(self.job_id.clone()));
        }
        (self.publisher)(event_type, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (EventPublisher, Arc<Mutex<Vec<(String, Value)>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let publisher: EventPublisher = Arc::new(move |event_type, payload| {
            sink.lock().unwrap().push((event_type.to_string(), payload));
        });
        (publisher, events)
    }

    #[test]
    fn test_percentage_maps_into_span() {
        let (publisher, _) = recording();
        let reporter = ProgressReporter::new(publisher, "job", 70.0, 30.0);

        assert!((reporter.percentage(CompositionStage::Validating, 0.0) - 70.0).abs() < 1e-9);
        assert!((reporter.percentage(CompositionStage::Uploading, 1.0) - 100.0).abs() < 1e-9);
        assert!((reporter.percentage(CompositionStage::Normalizing, 0.0) - 76.0).abs() < 1e-9);
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let (publisher, events) = recording();
        let reporter = ProgressReporter::new(publisher, "job", 0.0, 100.0);

        reporter.stage(CompositionStage::Encoding, "encoding");
        reporter.stage_progress(CompositionStage::Downloading, 0.5, "late download event");

        let events = events.lock().unwrap();
        let first = events[0].1["percentage"].as_f64().unwrap();
        let second = events[1].1["percentage"].as_f64().unwrap();
        assert!(second >= first);
        assert_eq!(events[1].1["job_id"], "job");
        assert_eq!(events[0].0, EVENT_PROGRESS);
    }

    #[test]
    fn test_failure_event_payload() {
        let (publisher, events) = recording();
        let reporter = ProgressReporter::new(publisher, "job-9", 70.0, 30.0);

        let err = ComposeError::permanent(CompositionStage::Downloading, Some(2), "tiny payload");
        reporter.failed(&err);

        let events = events.lock().unwrap();
        assert_eq!(events[0].0, EVENT_FAILED);
        assert_eq!(events[0].1["stage"], "downloading");
        assert_eq!(events[0].1["clip_index"], 2);
        assert_eq!(events[0].1["retryable"], false);
    }
}
