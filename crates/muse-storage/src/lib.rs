//! Object storage for composed videos.
//!
//! This crate provides:
//! - The Cloudflare R2 client (upload, presigned URLs, connectivity check)
//! - The [`ArtifactStore`] seam the composer uploads through
//! - A filesystem-backed store for local runs and tests

pub mod client;
pub mod error;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use store::{validate_key, ArtifactStore, LocalStore};
