//! Music-video composition pipeline.
//!
//! This crate provides:
//! - The composition driver and its stage sequence
//! - Parallel clip and audio download
//! - Upload of the finished video
//! - Progress events, job logging and metrics
//! - Per-run workspace lifecycle

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod uploader;
pub mod workspace;

pub use config::ComposerConfig;
pub use error::{ComposeError, ComposeResult, ResultExt};
pub use events::{noop_publisher, tracing_publisher, EventPublisher, ProgressReporter};
pub use fetcher::{ClipFetcher, FetchError, FetchedFile, FetchedMedia};
pub use logging::{init_tracing, JobLogger};
pub use pipeline::CompositionDriver;
pub use uploader::{composition_key, UploadedVideo, Uploader};
pub use workspace::Workspace;
