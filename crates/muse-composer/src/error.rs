//! Composer error types.

use std::fmt;

use thiserror::Error;

use muse_media::MediaError;
use muse_models::CompositionStage;
use muse_storage::StorageError;

use crate::fetcher::FetchError;

pub type ComposeResult<T> = Result<T, ComposeError>;

/// A failed composition, classified for the caller.
///
/// Permanent errors mean the same input will fail again. Retryable errors
/// have already been retried locally; a whole-run retry is the caller's call.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("{stage}{}: {message}", clip_suffix(.clip_index))]
    Permanent {
        stage: CompositionStage,
        clip_index: Option<u32>,
        message: String,
    },

    #[error("{stage}{} (retryable): {message}", clip_suffix(.clip_index))]
    Retryable {
        stage: CompositionStage,
        clip_index: Option<u32>,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

fn clip_suffix(clip_index: &Option<u32>) -> String {
    clip_index
        .map(|i| format!(" [clip {}]", i))
        .unwrap_or_default()
}

impl ComposeError {
    pub fn permanent(
        stage: CompositionStage,
        clip_index: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self::Permanent {
            stage,
            clip_index,
            message: message.into(),
        }
    }

    pub fn retryable(
        stage: CompositionStage,
        clip_index: Option<u32>,
        message: impl Into<String>,
    ) -> Self {
        Self::Retryable {
            stage,
            clip_index,
            message: message.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_retryable()
    }

    /// Stage the failure happened in, `Validating` for configuration errors.
    pub fn stage(&self) -> CompositionStage {
        match self {
            Self::Permanent { stage, .. } | Self::Retryable { stage, .. } => *stage,
            Self::Config(_) => CompositionStage::Validating,
        }
    }

    pub fn clip_index(&self) -> Option<u32> {
        match self {
            Self::Permanent { clip_index, .. } | Self::Retryable { clip_index, .. } => *clip_index,
            Self::Config(_) => None,
        }
    }
}

/// Lower-layer errors that know whether another attempt could help.
pub trait Classify: fmt::Display {
    fn is_retryable(&self) -> bool;
}

impl Classify for MediaError {
    fn is_retryable(&self) -> bool {
        MediaError::is_retryable(self)
    }
}

impl Classify for StorageError {
    fn is_retryable(&self) -> bool {
        StorageError::is_retryable(self)
    }
}

impl Classify for FetchError {
    fn is_retryable(&self) -> bool {
        FetchError::is_retryable(self)
    }
}

impl Classify for std::io::Error {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Attach stage context to a lower-layer result.
pub trait ResultExt<T> {
    fn in_stage(self, stage: CompositionStage, clip_index: Option<u32>) -> ComposeResult<T>;
}

impl<T, E: Classify> ResultExt<T> for Result<T, E> {
    fn in_stage(self, stage: CompositionStage, clip_index: Option<u32>) -> ComposeResult<T> {
        self.map_err(|e| {
            if e.is_retryable() {
                ComposeError::retryable(stage, clip_index, e.to_string())
            } else {
                ComposeError::permanent(stage, clip_index, e.to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_errors_keep_their_class() {
        let timeout: Result<(), _> = Err(MediaError::Timeout(300));
        let err = timeout
            .in_stage(CompositionStage::Normalizing, Some(2))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.stage(), CompositionStage::Normalizing);
        assert_eq!(err.clip_index(), Some(2));

        let missing: Result<(), _> = Err(MediaError::FfmpegNotFound);
        let err = missing.in_stage(CompositionStage::Encoding, None).unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ComposeError::permanent(
            CompositionStage::Downloading,
            Some(1),
            "payload is 12 bytes",
        );
        assert_eq!(err.to_string(), "downloading [clip 1]: payload is 12 bytes");

        let err = ComposeError::retryable(CompositionStage::Uploading, None, "503");
        assert_eq!(err.to_string(), "uploading (retryable): 503");
    }

    #[test]
    fn test_config_errors_are_permanent() {
        let err = ComposeError::config("cascading compensation cannot be disabled");
        assert!(err.is_permanent());
        assert_eq!(err.stage(), CompositionStage::Validating);
    }
}
