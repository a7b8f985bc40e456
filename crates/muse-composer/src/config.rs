//! Composer configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use muse_media::extend::ExtensionLimits;
use muse_media::reconcile::DEFAULT_DURATION_EPSILON;
use muse_media::{FfmpegRunner, ShortfallThresholds, TransitionSettings};
use muse_models::EncodingProfile;

use crate::error::{ComposeError, ComposeResult};

/// Composer configuration.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Root for per-run workspaces
    pub work_dir: PathBuf,
    /// Canonical output parameters
    pub encoding: EncodingProfile,
    /// Tolerance when comparing clip durations
    pub duration_epsilon: f64,
    pub thresholds: ShortfallThresholds,
    /// Deficits below this are covered by freezing the last frame
    pub freeze_threshold_secs: f64,
    /// Must stay on; there is no other reconciliation strategy
    pub cascading_compensation: bool,
    pub transitions: TransitionSettings,
    /// Timeout per FFmpeg invocation
    pub tool_timeout: Duration,
    /// Retries per FFmpeg invocation
    pub tool_retries: u32,
    /// Timeout per download request
    pub download_timeout: Duration,
    /// Start of the composer's slice of the caller's 0-100 scale
    pub progress_base: f64,
    /// Width of that slice
    pub progress_span: f64,
    /// Interval between progress events during upload
    pub upload_heartbeat: Duration,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/muse-compose"),
            encoding: EncodingProfile::default(),
            duration_epsilon: DEFAULT_DURATION_EPSILON,
            thresholds: ShortfallThresholds::default(),
            freeze_threshold_secs: 2.0,
            cascading_compensation: true,
            transitions: TransitionSettings::default(),
            tool_timeout: Duration::from_secs(300),
            tool_retries: 1,
            download_timeout: Duration::from_secs(120),
            progress_base: 70.0,
            progress_span: 30.0,
            upload_heartbeat: Duration::from_secs(5),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

impl ComposerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();

        let encoding = EncodingProfile {
            width: env_or("COMPOSER_WIDTH", d.encoding.width),
            height: env_or("COMPOSER_HEIGHT", d.encoding.height),
            fps: env_or("COMPOSER_FPS", d.encoding.fps),
            video_bitrate: env_or("COMPOSER_VIDEO_BITRATE", d.encoding.video_bitrate.clone()),
            audio_bitrate: env_or("COMPOSER_AUDIO_BITRATE", d.encoding.audio_bitrate.clone()),
            threads: env_or("COMPOSER_THREADS", d.encoding.threads),
            preset: env_or("COMPOSER_PRESET", d.encoding.preset.clone()),
            ..d.encoding.clone()
        };

        Self {
            work_dir: std::env::var("COMPOSER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.work_dir),
            encoding,
            duration_epsilon: env_or("COMPOSER_DURATION_EPSILON", d.duration_epsilon),
            thresholds: ShortfallThresholds {
                accept: env_or("COMPOSER_ACCEPT_THRESHOLD", d.thresholds.accept),
                extend: env_or("COMPOSER_EXTEND_THRESHOLD", d.thresholds.extend),
                fail: env_or("COMPOSER_FAIL_THRESHOLD", d.thresholds.fail),
                max_extension_secs: env_or(
                    "COMPOSER_MAX_EXTENSION_SECS",
                    d.thresholds.max_extension_secs,
                ),
            },
            freeze_threshold_secs: env_or(
                "COMPOSER_FREEZE_THRESHOLD_SECS",
                d.freeze_threshold_secs,
            ),
            cascading_compensation: env_bool(
                "COMPOSER_CASCADING_COMPENSATION",
                d.cascading_compensation,
            ),
            transitions: TransitionSettings {
                max_transition_secs: env_or(
                    "COMPOSER_MAX_TRANSITION_SECS",
                    d.transitions.max_transition_secs,
                ),
                beat_snap_tolerance: env_or(
                    "COMPOSER_BEAT_SNAP_TOLERANCE",
                    d.transitions.beat_snap_tolerance,
                ),
            },
            tool_timeout: Duration::from_secs(env_or(
                "COMPOSER_TOOL_TIMEOUT_SECS",
                d.tool_timeout.as_secs(),
            )),
            tool_retries: env_or("COMPOSER_TOOL_RETRIES", d.tool_retries),
            download_timeout: Duration::from_secs(env_or(
                "COMPOSER_DOWNLOAD_TIMEOUT_SECS",
                d.download_timeout.as_secs(),
            )),
            progress_base: env_or("COMPOSER_PROGRESS_BASE", d.progress_base),
            progress_span: env_or("COMPOSER_PROGRESS_SPAN", d.progress_span),
            upload_heartbeat: Duration::from_secs(env_or(
                "COMPOSER_UPLOAD_HEARTBEAT_SECS",
                d.upload_heartbeat.as_secs(),
            )),
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> ComposeResult<()> {
        if !self.cascading_compensation {
            return Err(ComposeError::config(
                "cascading compensation cannot be disabled: no other reconciliation strategy exists",
            ));
        }

        let t = &self.thresholds;
        if !(0.0 < t.accept && t.accept < t.extend && t.extend < t.fail && t.fail <= 1.0) {
            return Err(ComposeError::config(format!(
                "shortfall thresholds must satisfy 0 < accept < extend < fail <= 1, got {} / {} / {}",
                t.accept, t.extend, t.fail
            )));
        }

        if self.encoding.width == 0 || self.encoding.height == 0 || self.encoding.fps == 0 {
            return Err(ComposeError::config(
                "width, height and fps must be positive",
            ));
        }

        let positive = [
            ("duration epsilon", self.duration_epsilon),
            ("max extension", t.max_extension_secs),
            ("freeze threshold", self.freeze_threshold_secs),
            ("max transition", self.transitions.max_transition_secs),
        ];
        if let Some((name, value)) = positive.iter().find(|(_, v)| !(*v > 0.0)) {
            return Err(ComposeError::config(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }

        if self.progress_base < 0.0
            || self.progress_span <= 0.0
            || self.progress_base + self.progress_span > 100.0
        {
            return Err(ComposeError::config(format!(
                "progress range {}..{} must lie within 0..100",
                self.progress_base,
                self.progress_base + self.progress_span
            )));
        }

        if self.upload_heartbeat.is_zero() {
            return Err(ComposeError::config("upload heartbeat must be positive"));
        }

        Ok(())
    }

    /// FFmpeg runner with the configured timeout and retries.
    pub fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_timeout(self.tool_timeout.as_secs())
            .with_retries(self.tool_retries)
    }

    pub fn extension_limits(&self) -> ExtensionLimits {
        ExtensionLimits {
            freeze_threshold_secs: self.freeze_threshold_secs,
            max_extension_secs: self.thresholds.max_extension_secs,
        }
    }
}
