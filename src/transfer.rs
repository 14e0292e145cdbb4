//! Resumable chunked HTTP transfer
//!
//! Downloads a single resource to a single local file using HTTP range
//! requests, so an interrupted run continues from the last byte already on
//! disk. Writes are positional (seek + write), never appends, so a retry can
//! never corrupt the already-written prefix.
//!
//! The CDN requires a browser-like User-Agent and a platform Referer on
//! every request (anti-hotlinking) — a wire-protocol requirement, not an
//! implementation detail.

use crate::config::{Config, NetworkConfig, ProgressConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::IsRetryable;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{RANGE, REFERER, USER_AGENT};
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// One resumable download of a single stream to a single file
///
/// Holds the shared HTTP client plus the network/retry/progress policy.
/// Cheap to construct per run; the client itself is injected and reused.
pub struct ChunkedTransfer {
    client: reqwest::Client,
    network: NetworkConfig,
    retry: RetryConfig,
    progress: ProgressConfig,
}

impl ChunkedTransfer {
    /// Create a transfer engine from an injected client and the configuration.
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            network: config.network.clone(),
            retry: config.retry.clone(),
            progress: config.progress.clone(),
        }
    }

    /// Download `url` into `destination`, resuming any partial file found there.
    ///
    /// `on_progress` receives the local fraction in [0, 1] at a bounded rate;
    /// the final emission on success is always exactly 1.0.
    ///
    /// Transient failures are retried with linear backoff (`attempt *
    /// base_delay`) up to the configured ceiling; the partial file length is
    /// re-read from disk on every attempt, so progress is never lost across
    /// retries. Exhausting the ceiling surfaces [`Error::Transfer`] with the
    /// last underlying cause.
    ///
    /// Cancellation is checked between read iterations and surfaces as
    /// [`Error::Cancelled`], never as a transfer failure; the connection and
    /// file handle are closed before returning.
    pub async fn download<F>(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(f64) + Send,
    {
        let mut attempt: u32 = 0;

        loop {
            match self.run_once(url, destination, cancel, &mut on_progress).await {
                Ok(()) => return Ok(()),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self
                        .retry
                        .base_delay
                        .saturating_mul(attempt)
                        .min(self.retry.max_delay);
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis(),
                        "transfer interrupted, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    let cause = match e {
                        Error::Transfer(message) => message,
                        other => other.to_string(),
                    };
                    return Err(Error::Transfer(format!(
                        "{cause} (attempt {})",
                        attempt + 1
                    )));
                }
            }
        }
    }

    /// One download attempt: stat the partial file, issue the (possibly
    /// ranged) request, and stream the body to disk at the right offset.
    async fn run_once<F>(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(f64) + Send,
    {
        // Fresh from disk every attempt, so interrupted progress is kept
        let current_len = match tokio::fs::metadata(destination).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.network.user_agent)
            .header(REFERER, &self.network.referer);
        if current_len > 0 {
            request = request.header(RANGE, format!("bytes={current_len}-"));
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();

        // The partial file already covers the whole resource
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::debug!(url = %url, bytes = current_len, "file already complete");
            on_progress(1.0);
            return Ok(());
        }

        let (offset, total) = if status == StatusCode::PARTIAL_CONTENT {
            let remaining = response.content_length().unwrap_or(0);
            (current_len, current_len + remaining)
        } else if status == StatusCode::OK {
            if current_len > 0 {
                tracing::warn!(
                    url = %url,
                    partial_bytes = current_len,
                    "server ignored range request, restarting from scratch"
                );
            }
            (0, response.content_length().unwrap_or(0))
        } else {
            return Err(Error::Transfer(format!(
                "unexpected status {status} from upstream"
            )));
        };

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(destination)
            .await?;
        if offset == 0 {
            // Discard any stale partial content before a full restart
            file.set_len(0).await?;
        }
        file.seek(SeekFrom::Start(offset)).await?;

        let mut stream = Box::pin(response.bytes_stream());
        let mut written = offset;
        let mut since_emit: u64 = 0;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            since_emit += chunk.len() as u64;

            if since_emit >= self.progress.emit_every_bytes && total > 0 {
                since_emit = 0;
                on_progress(((written as f64) / (total as f64)).min(1.0));
            }
        }
        file.flush().await?;

        if total > 0 && written < total {
            // Body ended early: classic transient drop, retryable
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed at {written} of {total} bytes"),
            )));
        }

        tracing::debug!(url = %url, bytes = written, "transfer complete");
        on_progress(1.0);
        Ok(())
    }
}
