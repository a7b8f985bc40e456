//! End-to-end composition against a real FFmpeg install.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::process::Command;

use muse_composer::{ComposerConfig, CompositionDriver, EventPublisher};
use muse_models::progress::{EVENT_COMPLETED, EVENT_PROGRESS};
use muse_models::{
    Clip, ClipCollection, CompositionRequest, CompositionStatus, EncodingProfile, Transition,
    TransitionType,
};
use muse_storage::LocalStore;

async fn ffmpeg(args: &[&str]) {
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error"])
        .args(args)
        .status()
        .await
        .expect("ffmpeg must be installed");
    assert!(status.success(), "ffmpeg {:?} failed", args);
}

async fn test_clip(dir: &Path, index: u32, secs: f64) -> PathBuf {
    let path = dir.join(format!("src_{}.mp4", index));
    let source = format!("testsrc=size=480x270:rate=30:duration={}", secs);
    ffmpeg(&["-f", "lavfi", "-i", &source, "-pix_fmt", "yuv420p", path.to_str().unwrap()]).await;
    path
}

async fn test_audio(dir: &Path, secs: f64) -> PathBuf {
    let path = dir.join("song.m4a");
    let source = format!("sine=frequency=440:duration={}", secs);
    ffmpeg(&["-f", "lavfi", "-i", &source, "-c:a", "aac", path.to_str().unwrap()]).await;
    path
}

fn small_config(work_dir: &Path) -> ComposerConfig {
    ComposerConfig {
        work_dir: work_dir.to_path_buf(),
        encoding: EncodingProfile {
            width: 320,
            height: 180,
            fps: 24,
            preset: "ultrafast".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn recording() -> (EventPublisher, Arc<Mutex<Vec<(String, Value)>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let publisher: EventPublisher = Arc::new(move |event_type, payload| {
        sink.lock().unwrap().push((event_type.to_string(), payload));
    });
    (publisher, events)
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe"]
async fn test_compose_with_cascading_trim() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store_root = tempfile::tempdir().unwrap();

    let actuals = [5.0, 7.0, 6.0];
    let mut clips = Vec::new();
    for (i, secs) in actuals.iter().enumerate() {
        let path = test_clip(media.path(), i as u32, *secs).await;
        clips.push(Clip::new(i as u32, path.to_str().unwrap(), 6.0, *secs));
    }
    let audio = test_audio(media.path(), 18.0).await;

    let request = CompositionRequest {
        job_id: "e2e-cascade".to_string(),
        clips: ClipCollection::new(clips),
        audio_url: Some(audio.to_str().unwrap().to_string()),
        beat_times: None,
        transitions: None,
        aspect_ratio: None,
    };

    let (publisher, events) = recording();
    let driver = CompositionDriver::new(
        small_config(work.path()),
        Arc::new(LocalStore::new(store_root.path())),
        publisher,
    )
    .unwrap();

    let output = driver.compose(&request).await.unwrap();

    assert_eq!(output.status, CompositionStatus::Completed);
    assert_eq!(output.clips_used, 3);
    assert_eq!(output.clips_trimmed, 1);
    assert_eq!(output.compensation.events[0].index, 1);
    assert!(output.compensation.cumulative_shortfall.abs() < 0.1);
    assert!((output.duration - 18.0).abs() < 0.5, "duration {}", output.duration);
    assert!(output.file_size > 10 * 1024);
    assert!(output.location.starts_with("file://"));

    let events = events.lock().unwrap();
    let percentages: Vec<f64> = events
        .iter()
        .filter(|(t, _)| t == EVENT_PROGRESS)
        .map(|(_, p)| p["percentage"].as_f64().unwrap())
        .collect();
    assert!(percentages.windows(2).all(|w| w[1] >= w[0]));
    assert!(events.iter().any(|(t, p)| t == EVENT_PROGRESS
        && p["stage"] == "encoding"
        && p["message"].as_str().unwrap().starts_with("Encoding final video (")));
    assert_eq!(events.last().unwrap().0, EVENT_COMPLETED);

    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe"]
async fn test_compose_with_crossfades_pads_to_audio() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store_root = tempfile::tempdir().unwrap();

    let mut clips = Vec::new();
    for i in 0..3u32 {
        let path = test_clip(media.path(), i, 4.0).await;
        clips.push(Clip::new(i, path.to_str().unwrap(), 4.0, 4.0));
    }
    let audio = test_audio(media.path(), 12.0).await;

    let request = CompositionRequest {
        job_id: "e2e-xfade".to_string(),
        clips: ClipCollection::new(clips),
        audio_url: Some(audio.to_str().unwrap().to_string()),
        beat_times: Some(vec![3.5, 7.0]),
        transitions: Some(vec![
            Transition::new(0, TransitionType::Crossfade, 0.5),
            Transition::new(1, TransitionType::Fade, 0.5),
        ]),
        aspect_ratio: Some("9:16".to_string()),
    };

    let driver = CompositionDriver::new(
        small_config(work.path()),
        Arc::new(LocalStore::new(store_root.path())),
        muse_composer::noop_publisher(),
    )
    .unwrap();

    let output = driver.compose(&request).await.unwrap();

    assert_eq!(output.transitions_applied, 2);
    assert!((output.duration - 12.0).abs() < 0.5, "duration {}", output.duration);
    assert!(output.sync_drift < 0.5);
}

#[tokio::test]
#[ignore = "requires ffmpeg and ffprobe"]
async fn test_compose_extends_short_last_clip() {
    let media = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    let store_root = tempfile::tempdir().unwrap();

    // 4s short of an 18s timeline: between the extend and fail thresholds
    let actuals = [6.0, 6.0, 2.0];
    let mut clips = Vec::new();
    for (i, secs) in actuals.iter().enumerate() {
        let path = test_clip(media.path(), i as u32, *secs).await;
        clips.push(Clip::new(i as u32, path.to_str().unwrap(), 6.0, *secs));
    }
    let audio = test_audio(media.path(), 18.0).await;

    let request = CompositionRequest {
        job_id: "e2e-extend".to_string(),
        clips: ClipCollection::new(clips),
        audio_url: Some(audio.to_str().unwrap().to_string()),
        beat_times: None,
        transitions: None,
        aspect_ratio: None,
    };

    let driver = CompositionDriver::new(
        small_config(work.path()),
        Arc::new(LocalStore::new(store_root.path())),
        muse_composer::noop_publisher(),
    )
    .unwrap();

    let output = driver.compose(&request).await.unwrap();

    assert_eq!(output.clips_used, 3);
    assert_eq!(output.clips_looped, 1);
    assert!((output.compensation.cumulative_shortfall - 4.0).abs() < 0.1);
    assert!((output.duration - 18.0).abs() < 0.5, "duration {}", output.duration);
}
