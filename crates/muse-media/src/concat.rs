//! Stream-copy concatenation with the concat demuxer.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Render the concat demuxer list for `segments`.
///
/// Single quotes in paths are escaped the way the demuxer expects.
pub fn concat_list(segments: &[PathBuf]) -> String {
    segments
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Concatenate `segments` into `output` without re-encoding.
///
/// All segments must share codec parameters. `list_path` receives the
/// demuxer list file. `max_duration` caps the output length.
pub async fn concat_stream_copy(
    segments: &[PathBuf],
    list_path: &Path,
    output: &Path,
    max_duration: Option<f64>,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    if segments.is_empty() {
        return Err(MediaError::internal("Nothing to concatenate"));
    }

    tokio::fs::write(list_path, concat_list(segments)).await?;

    let mut cmd = FfmpegCommand::new(list_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .codec_copy();

    if let Some(max) = max_duration {
        cmd = cmd.output_duration(max);
    }

    runner
        .run(&cmd.output_args(["-movflags", "+faststart"]))
        .await?;

    info!(
        segments = segments.len(),
        output = %output.display(),
        "Concatenated segments with stream copy"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list_format() {
        let list = concat_list(&[PathBuf::from("/w/a.mp4"), PathBuf::from("/w/b.mp4")]);
        assert_eq!(list, "file '/w/a.mp4'\nfile '/w/b.mp4'\n");
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_concat_list_repeats_segments() {
        let tail = PathBuf::from("/w/tail.mp4");
        let list = concat_list(&[PathBuf::from("/w/clip.mp4"), tail.clone(), tail]);
        assert_eq!(list.matches("tail.mp4").count(), 2);
    }
}
