//! Upload of the final video and its thumbnail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use muse_media::{retry_async_if, RetryConfig};
use muse_models::CompositionStage;
use muse_storage::{ArtifactStore, StorageError};

use crate::error::{ComposeResult, ResultExt};
use crate::events::ProgressReporter;
use crate::workspace::sanitize;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Storage key for a composed video: unique per run and sortable by time.
///
/// The job id is reduced to one path segment so it cannot escape the
/// `compositions/` prefix.
pub fn composition_key(job_id: &str, at: DateTime<Utc>, run_id: Uuid) -> String {
    let run = run_id.simple().to_string();
    format!(
        "compositions/{}/{}_{}.mp4",
        sanitize(job_id),
        at.format("%Y%m%dT%H%M%S%3f"),
        &run[..8]
    )
}

/// Thumbnail key next to its video.
pub fn thumbnail_key(video_key: &str) -> String {
    match video_key.strip_suffix(".mp4") {
        Some(stem) => format!("{}_thumb.jpg", stem),
        None => format!("{}_thumb.jpg", video_key),
    }
}

/// Where an upload landed.
#[derive(Debug, Clone)]
pub struct UploadedVideo {
    pub key: String,
    pub location: String,
    pub thumbnail_location: Option<String>,
}

/// Pushes finished compositions to an [`ArtifactStore`].
#[derive(Clone)]
pub struct Uploader {
    store: Arc<dyn ArtifactStore>,
    heartbeat: Duration,
    retry: RetryConfig,
}

impl Uploader {
    pub fn new(store: Arc<dyn ArtifactStore>, heartbeat: Duration) -> Self {
        Self {
            store,
            heartbeat,
            retry: RetryConfig::new("upload").with_max_retries(2),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Upload `video` under a fresh key and resolve its URL.
    ///
    /// Progress events keep flowing while the transfer runs. A thumbnail
    /// failure is logged and never fails the upload.
    pub async fn upload(
        &self,
        job_id: &str,
        video: &Path,
        thumbnail: Option<&Path>,
        reporter: &ProgressReporter,
    ) -> ComposeResult<UploadedVideo> {
        let stage = CompositionStage::Uploading;
        let key = composition_key(job_id, Utc::now(), Uuid::new_v4());

        let transfer = retry_async_if(
            &self.retry,
            || self.store.upload_file(video, &key, VIDEO_CONTENT_TYPE),
            StorageError::is_retryable,
        );
        self.with_heartbeat(transfer, reporter)
            .await
            .in_stage(stage, None)?;

        let location = self.store.public_url(&key).await.in_stage(stage, None)?;
        info!(key = %key, location = %location, "Uploaded composition");

        let thumbnail_location = match thumbnail {
            Some(path) => self.upload_thumbnail(path, &thumbnail_key(&key)).await,
            None => None,
        };

        Ok(UploadedVideo {
            key,
            location,
            thumbnail_location,
        })
    }

    async fn upload_thumbnail(&self, path: &Path, key: &str) -> Option<String> {
        let uploaded = async {
            self.store
                .upload_file(path, key, THUMBNAIL_CONTENT_TYPE)
                .await?;
            self.store.public_url(key).await
        };
        match uploaded.await {
            Ok(location) => Some(location),
            Err(e) => {
                warn!(key, error = %e, "Thumbnail upload failed");
                None
            }
        }
    }

    /// Drive `transfer` while emitting progress every heartbeat.
    ///
    /// The fraction approaches but never reaches 1; completion is reported by
    /// the caller.
    async fn with_heartbeat<T>(
        &self,
        transfer: impl std::future::Future<Output = T>,
        reporter: &ProgressReporter,
    ) -> T {
        tokio::pin!(transfer);
        let started = std::time::Instant::now();
        let mut interval = tokio::time::interval(self.heartbeat);
        interval.tick().await;
        let mut beats = 0i32;

        loop {
            tokio::select! {
                result = &mut transfer => return result,
                _ = interval.tick() => {
                    beats += 1;
                    let fraction = 1.0 - 0.5f64.powi(beats);
                    reporter.stage_progress(
                        CompositionStage::Uploading,
                        fraction.min(0.95),
                        format!("Uploading ({:.0}s)", started.elapsed().as_secs_f64()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use muse_storage::{LocalStore, StorageResult};
    use serde_json::Value;

    use crate::events::{noop_publisher, EventPublisher};

    #[test]
    fn test_composition_key_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let run = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            composition_key("job-7", at, run),
            "compositions/job-7/20260314T150926000_a1b2c3d4.mp4"
        );
    }

    #[test]
    fn test_job_id_cannot_escape_key_prefix() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let run = Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap();

        let key = composition_key("../other/job", at, run);
        assert_eq!(key, "compositions/___other_job/20260314T150926000_a1b2c3d4.mp4");
        assert_eq!(key.split('/').count(), 3);

        assert!(composition_key("", at, run).starts_with("compositions/job/"));
    }

    #[test]
    fn test_keys_are_unique_per_run() {
        let at = Utc::now();
        assert_ne!(
            composition_key("job", at, Uuid::new_v4()),
            composition_key("job", at, Uuid::new_v4())
        );
    }

    #[test]
    fn test_thumbnail_key() {
        assert_eq!(
            thumbnail_key("compositions/j/x_1.mp4"),
            "compositions/j/x_1_thumb.jpg"
        );
    }

    #[tokio::test]
    async fn test_upload_to_local_store() {
        let src = tempfile::tempdir().unwrap();
        let video = src.path().join("final.mp4");
        tokio::fs::write(&video, vec![0u8; 20_000]).await.unwrap();
        let thumb = src.path().join("thumb.jpg");
        tokio::fs::write(&thumb, b"jpeg").await.unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new(root.path()));
        let uploader = Uploader::new(store.clone(), Duration::from_secs(5));
        let reporter = ProgressReporter::new(noop_publisher(), "job-1", 0.0, 100.0);

        let uploaded = uploader
            .upload("job-1", &video, Some(&thumb), &reporter)
            .await
            .unwrap();

        assert!(uploaded.key.starts_with("compositions/job-1/"));
        assert!(uploaded.location.starts_with("file://"));
        assert!(store.path_for(&uploaded.key).exists());
        assert!(uploaded.thumbnail_location.is_some());
    }

    struct FailingStore;

    #[async_trait]
    impl ArtifactStore for FailingStore {
        async fn upload_file(&self, _: &Path, _: &str, _: &str) -> StorageResult<()> {
            Err(StorageError::upload_failed("connection reset"))
        }

        async fn public_url(&self, key: &str) -> StorageResult<String> {
            Ok(key.to_string())
        }
    }

    #[tokio::test]
    async fn test_upload_failure_is_retryable() {
        let src = tempfile::tempdir().unwrap();
        let video = src.path().join("final.mp4");
        tokio::fs::write(&video, b"x").await.unwrap();

        let uploader = Uploader::new(Arc::new(FailingStore), Duration::from_secs(5)).with_retry(
            RetryConfig::new("upload")
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(5)),
        );
        let reporter = ProgressReporter::new(noop_publisher(), "job", 0.0, 100.0);

        let err = uploader
            .upload("job", &video, None, &reporter)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.stage(), CompositionStage::Uploading);
    }

    struct SlowStore(LocalStore);

    #[async_trait]
    impl ArtifactStore for SlowStore {
        async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
            tokio::time::sleep(Duration::from_millis(120)).await;
            self.0.upload_file(path, key, content_type).await
        }

        async fn public_url(&self, key: &str) -> StorageResult<String> {
            self.0.public_url(key).await
        }
    }

    #[tokio::test]
    async fn test_heartbeat_publishes_while_uploading() {
        let src = tempfile::tempdir().unwrap();
        let video = src.path().join("final.mp4");
        tokio::fs::write(&video, b"x").await.unwrap();
        let root = tempfile::tempdir().unwrap();

        let events = Arc::new(Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&events);
        let publisher: EventPublisher = Arc::new(move |_, payload| {
            sink.lock().unwrap().push(payload);
        });
        let reporter = ProgressReporter::new(publisher, "job", 0.0, 100.0);

        let uploader = Uploader::new(
            Arc::new(SlowStore(LocalStore::new(root.path()))),
            Duration::from_millis(20),
        );
        uploader
            .upload("job", &video, None, &reporter)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        assert!(events
            .iter()
            .all(|e| e["percentage"].as_f64().unwrap() < 100.0));
    }
}
