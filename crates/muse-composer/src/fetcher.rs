//! Parallel download of clips and the audio track.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use muse_media::{retry_async_if, RetryConfig};
use muse_models::{Clip, CompositionStage};

use crate::error::{ComposeError, ComposeResult, ResultExt};

/// Payloads below this are treated as corrupt.
pub const MIN_PAYLOAD_BYTES: u64 = 1024;

/// Payloads above this are logged as suspicious but accepted.
pub const LARGE_PAYLOAD_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{location} is {size} bytes, below the {min} byte minimum")]
    TooSmall { location: String, size: u64, min: u64 },

    #[error("HTTP {status} fetching {location}")]
    Status { location: String, status: u16 },

    #[error("Request to {location} failed: {source}")]
    Transport {
        location: String,
        source: reqwest::Error,
    },

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported location: {0}")]
    Unsupported(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Network trouble is retryable; bad payloads and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Transport { .. } | Self::Io(_) => true,
            Self::TooSmall { .. } | Self::NotFound(_) | Self::Unsupported(_) | Self::Client(_) => {
                false
            }
        }
    }
}

/// Where a payload comes from.
#[derive(Debug, Clone, PartialEq)]
enum Source {
    Http(Url),
    File(PathBuf),
}

fn parse_location(location: &str) -> Result<Source, FetchError> {
    match Url::parse(location) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Source::Http(url)),
            "file" => url
                .to_file_path()
                .map(Source::File)
                .map_err(|_| FetchError::Unsupported(location.to_string())),
            _ => Err(FetchError::Unsupported(location.to_string())),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Source::File(PathBuf::from(location))),
        Err(_) => Err(FetchError::Unsupported(location.to_string())),
    }
}

/// Short alphanumeric extension of the location's path, if any.
fn file_extension(location: &str) -> Option<String> {
    let path = match parse_location(location).ok()? {
        Source::Http(url) => PathBuf::from(url.path()),
        Source::File(path) => path,
    };
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
}

/// A downloaded payload.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Every payload of one run.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    /// Keyed by clip index
    pub clips: HashMap<u32, FetchedFile>,
    pub audio: FetchedFile,
}

/// Downloads clips and audio over HTTP(S) or from the local filesystem.
#[derive(Debug, Clone)]
pub struct ClipFetcher {
    http: reqwest::Client,
    retry: RetryConfig,
}

impl ClipFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            http,
            retry: RetryConfig::new("download").with_max_retries(2),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch every clip and the audio concurrently into `dest_dir`.
    ///
    /// Completion order does not matter; results are keyed by clip index.
    pub async fn fetch_all(
        &self,
        clips: &[Clip],
        audio_location: &str,
        dest_dir: &Path,
    ) -> ComposeResult<FetchedMedia> {
        let stage = CompositionStage::Downloading;

        let clip_downloads = clips.iter().map(|clip| async move {
            let location = clip.location.as_deref().ok_or_else(|| {
                ComposeError::permanent(stage, Some(clip.index), "clip has no location")
            })?;
            let dest = dest_dir.join(with_extension(
                format!("clip_{:03}", clip.index),
                file_extension(location).as_deref().or(Some("mp4")),
            ));
            let size = self
                .fetch(location, &dest)
                .await
                .in_stage(stage, Some(clip.index))?;
            Ok::<_, ComposeError>((clip.index, FetchedFile { path: dest, size }))
        });

        let audio_download = async {
            let dest = dest_dir.join(with_extension(
                "audio".to_string(),
                file_extension(audio_location).as_deref(),
            ));
            let size = self
                .fetch(audio_location, &dest)
                .await
                .in_stage(stage, None)?;
            Ok::<_, ComposeError>(FetchedFile { path: dest, size })
        };

        let (clip_results, audio) = futures::join!(join_all(clip_downloads), audio_download);

        let clips = clip_results
            .into_iter()
            .collect::<ComposeResult<HashMap<_, _>>>()?;
        let audio = audio?;

        info!(
            clips = clips.len(),
            total_bytes = clips.values().map(|f| f.size).sum::<u64>() + audio.size,
            "Downloaded clips and audio"
        );

        Ok(FetchedMedia { clips, audio })
    }

    /// Fetch one payload to `dest` and validate its size.
    pub async fn fetch(&self, location: &str, dest: &Path) -> Result<u64, FetchError> {
        let size = match parse_location(location)? {
            Source::Http(url) => {
                let retry = RetryConfig {
                    operation_name: format!("download {}", url),
                    ..self.retry.clone()
                };
                retry_async_if(
                    &retry,
                    || self.download_http(&url, dest),
                    FetchError::is_retryable,
                )
                .await?
            }
            Source::File(path) => copy_local(&path, dest).await?,
        };

        check_size(location, size)?;
        debug!(location, size, dest = %dest.display(), "Fetched payload");
        Ok(size)
    }

    async fn download_http(&self, url: &Url, dest: &Path) -> Result<u64, FetchError> {
        let transport = |source| FetchError::Transport {
            location: url.to_string(),
            source,
        };

        let response = self.http.get(url.clone()).send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

fn with_extension(stem: String, extension: Option<&str>) -> String {
    match extension {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

async fn copy_local(path: &Path, dest: &Path) -> Result<u64, FetchError> {
    match tokio::fs::copy(path, dest).await {
        Ok(size) => Ok(size),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FetchError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn check_size(location: &str, size: u64) -> Result<(), FetchError> {
    if size < MIN_PAYLOAD_BYTES {
        return Err(FetchError::TooSmall {
            location: location.to_string(),
            size,
            min: MIN_PAYLOAD_BYTES,
        });
    }
    if size > LARGE_PAYLOAD_BYTES {
        warn!(location, size, "Unusually large payload");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> ClipFetcher {
        ClipFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_retry(
                RetryConfig::new("download")
                    .with_max_retries(2)
                    .with_base_delay(Duration::from_millis(10)),
            )
    }

    fn clip(index: u32, location: String) -> Clip {
        Clip::new(index, location, 6.0, 6.0)
    }

    #[test]
    fn test_parse_location() {
        assert!(matches!(
            parse_location("https://cdn.example.com/a.mp4"),
            Ok(Source::Http(_))
        ));
        assert_eq!(
            parse_location("/data/clip.mp4").unwrap(),
            Source::File(PathBuf::from("/data/clip.mp4"))
        );
        assert_eq!(
            parse_location("file:///data/clip.mp4").unwrap(),
            Source::File(PathBuf::from("/data/clip.mp4"))
        );
        assert!(matches!(
            parse_location("s3://bucket/clip.mp4"),
            Err(FetchError::Unsupported(_))
        ));
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("https://x.io/a/song.MP3?sig=1").as_deref(), Some("mp3"));
        assert_eq!(file_extension("/tmp/clip.mp4").as_deref(), Some("mp4"));
        assert_eq!(file_extension("https://x.io/stream"), None);
    }

    #[test]
    fn test_status_classification() {
        let status = |status| FetchError::Status {
            location: "u".into(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(status(408).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_all_keys_results_by_index() {
        let server = MockServer::start().await;
        for i in 0..3 {
            Mock::given(method("GET"))
                .and(path(format!("/clip{}.mp4", i)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![i as u8; 4096 + i]))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/song.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 8192]))
            .mount(&server)
            .await;

        let clips: Vec<Clip> = (0..3)
            .map(|i| clip(i, format!("{}/clip{}.mp4", server.uri(), i)))
            .collect();
        let dir = tempfile::tempdir().unwrap();

        let media = fetcher()
            .fetch_all(&clips, &format!("{}/song.mp3", server.uri()), dir.path())
            .await
            .unwrap();

        assert_eq!(media.clips.len(), 3);
        assert_eq!(media.clips[&2].size, 4098);
        assert!(media.clips[&1].path.ends_with("clip_001.mp4"));
        assert_eq!(media.audio.size, 8192);
        assert!(media.audio.path.ends_with("audio.mp3"));
    }

    #[tokio::test]
    async fn test_tiny_clip_is_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tiny.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 100]))
            .expect(1)
            .mount(&server)
            .await;

        let clips = vec![
            clip(0, format!("{}/ok.mp4", server.uri())),
            clip(1, format!("{}/tiny.mp4", server.uri())),
            clip(2, format!("{}/ok.mp4", server.uri())),
        ];
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher()
            .fetch_all(&clips, &format!("{}/ok.mp4", server.uri()), dir.path())
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(err.stage(), CompositionStage::Downloading);
        assert_eq!(err.clip_index(), Some(1));
    }

    #[tokio::test]
    async fn test_tiny_audio_is_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/song.mp3"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1023]))
            .mount(&server)
            .await;

        let clips: Vec<Clip> = (0..3)
            .map(|i| clip(i, format!("{}/ok.mp4", server.uri())))
            .collect();
        let dir = tempfile::tempdir().unwrap();

        let err = fetcher()
            .fetch_all(&clips, &format!("{}/song.mp3", server.uri()), dir.path())
            .await
            .unwrap_err();

        assert!(err.is_permanent());
        assert_eq!(err.clip_index(), None);
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_surface_as_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.mp4"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetcher()
            .fetch(&format!("{}/flaky.mp4", server.uri()), &dir.path().join("x.mp4"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetcher()
            .fetch(&format!("{}/gone.mp4", server.uri()), &dir.path().join("x.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_local_files_are_copied() {
        let src_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("clip.mp4");
        tokio::fs::write(&src, vec![1u8; 2048]).await.unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("out.mp4");
        let size = fetcher().fetch(src.to_str().unwrap(), &dest).await.unwrap();

        assert_eq!(size, 2048);
        assert!(dest.exists());

        let missing = fetcher()
            .fetch("/nonexistent/clip.mp4", &dest_dir.path().join("y.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(missing, FetchError::NotFound(_)));
        assert!(!missing.is_retryable());
    }
}
