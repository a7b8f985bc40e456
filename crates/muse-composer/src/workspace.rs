//! Per-run scratch directory.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// Directory holding every intermediate file of one run.
///
/// Removed by [`Workspace::cleanup`] on normal exits and by `Drop` when the
/// run is abandoned (panic or a dropped future).
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Create `{root}/{job_id}-{uuid8}`.
    pub async fn create(root: &Path, job_id: &str) -> io::Result<Self> {
        let suffix = Uuid::new_v4().simple().to_string();
        let path = root.join(format!("{}-{}", sanitize(job_id), &suffix[..8]));
        tokio::fs::create_dir_all(&path).await?;
        debug!(path = %path.display(), "Created workspace");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Create a subdirectory.
    pub async fn subdir(&self, name: &str) -> io::Result<PathBuf> {
        let dir = self.path.join(name);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Remove the directory and everything in it.
    pub async fn cleanup(mut self) -> io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

/// Job id reduced to a single safe path segment.
pub(crate) fn sanitize(job_id: &str) -> String {
    let cleaned: String = job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}
