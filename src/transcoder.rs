//! External transcoder seam — merging the two elementary streams
//!
//! The merge step is delegated to an external tool. The trait bridges the
//! tool's process lifecycle into the orchestrator's awaitable phase model,
//! including a cancellation hook that maps onto killing the process.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Capabilities of a transcoder implementation
#[derive(Debug, Clone, Copy)]
pub struct TranscoderCapabilities {
    /// Can merge a video and an audio stream into one container
    pub can_merge: bool,
}

/// Trait for the external merge/transcode collaborator
///
/// Invoked exactly once per successful pair of transfers. Implementations
/// can shell out to a system binary or provide stub functionality for
/// graceful degradation.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Merge `video` and `audio` into `output`.
    ///
    /// Success means `output` exists and is complete. Cancellation must stop
    /// the underlying tool and surface as
    /// [`Error::Cancelled`](crate::Error::Cancelled), never as a transcode
    /// failure.
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Query capabilities of this transcoder
    fn capabilities(&self) -> TranscoderCapabilities;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// CLI-based transcoder using an external ffmpeg binary
///
/// Streams are merged without re-encoding (`-c copy`); ffmpeg only rewrites
/// the container.
///
/// # Examples
///
/// ```no_run
/// use bili_dl::transcoder::{CliTranscoder, Transcoder};
/// use std::path::PathBuf;
///
/// // Create with explicit path
/// let transcoder = CliTranscoder::new(PathBuf::from("/usr/bin/ffmpeg"));
///
/// // Or auto-discover from PATH
/// let transcoder = CliTranscoder::from_path()
///     .expect("ffmpeg not found in PATH");
/// ```
pub struct CliTranscoder {
    binary_path: PathBuf,
}

impl CliTranscoder {
    /// Create a new CLI transcoder with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Attempt to find ffmpeg in PATH
    ///
    /// Returns `Some(CliTranscoder)` if the binary is found, `None` otherwise.
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }
}

#[async_trait]
impl Transcoder for CliTranscoder {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let child = Command::new(&self.binary_path)
            .arg("-y")
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c", "copy"])
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Transcode(format!("failed to execute ffmpeg: {e}")))?;

        tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the child future kills ffmpeg (kill_on_drop)
                tracing::debug!(output = %output.display(), "merge cancelled, killing ffmpeg");
                Err(Error::Cancelled)
            }
            result = child.wait_with_output() => {
                let out = result
                    .map_err(|e| Error::Transcode(format!("failed to wait for ffmpeg: {e}")))?;
                if out.status.success() {
                    Ok(())
                } else {
                    Err(Error::Transcode(format!(
                        "ffmpeg exited with {}: {}",
                        out.status,
                        stderr_tail(&out.stderr)
                    )))
                }
            }
        }
    }

    fn capabilities(&self) -> TranscoderCapabilities {
        TranscoderCapabilities { can_merge: true }
    }

    fn name(&self) -> &'static str {
        "cli-ffmpeg"
    }
}

/// Last few hundred characters of stderr; ffmpeg puts the actual error at the end.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().rev().nth(399) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

/// No-op transcoder used when ffmpeg is unavailable
///
/// Provides graceful degradation by returning
/// [`Error::NotSupported`](crate::Error::NotSupported) from merge.
pub struct NoOpTranscoder;

#[async_trait]
impl Transcoder for NoOpTranscoder {
    async fn merge(
        &self,
        _video: &Path,
        _audio: &Path,
        _output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        Err(Error::NotSupported(
            "stream merging requires an external ffmpeg binary. \
             Configure ffmpeg_path in config or ensure ffmpeg is in PATH."
                .into(),
        ))
    }

    fn capabilities(&self) -> TranscoderCapabilities {
        TranscoderCapabilities { can_merge: false }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
