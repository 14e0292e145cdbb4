//! Common test utilities for bili-dl integration tests

use async_trait::async_trait;
use bili_dl::resolver::{ResolvedStreams, StreamResolver};
use bili_dl::transcoder::{Transcoder, TranscoderCapabilities};
use bili_dl::types::{SessionState, StreamDescriptor};
use bili_dl::wbi::SignedQuery;
use bili_dl::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wiremock::{Request, Respond, ResponseTemplate};

/// Resolver double that always returns the configured stream candidates.
pub struct StubResolver {
    streams: ResolvedStreams,
}

impl StubResolver {
    pub fn new(streams: ResolvedStreams) -> Self {
        Self { streams }
    }

    pub fn single_pair(video_url: String, audio_url: String) -> Self {
        Self::new(ResolvedStreams {
            video: vec![StreamDescriptor {
                id: 80,
                codecs: "avc1.640032".into(),
                bandwidth: 2_000_000,
                url: video_url,
            }],
            audio: vec![StreamDescriptor {
                id: 30280,
                codecs: "mp4a.40.2".into(),
                bandwidth: 320_000,
                url: audio_url,
            }],
        })
    }
}

#[async_trait]
impl StreamResolver for StubResolver {
    async fn signing_keys(&self) -> Result<(String, String)> {
        Ok(("abcdefghijklmnopqrstuvwxyz012345".into(), "ABCDEFGHIJKLMNOPQRSTUVWXYZ678901".into()))
    }

    async fn resolve(&self, query: &SignedQuery) -> Result<ResolvedStreams> {
        assert!(
            query.as_str().contains("&w_rid="),
            "resolver must always receive a sealed query"
        );
        Ok(self.streams.clone())
    }
}

/// Transcoder double that concatenates video + audio into the output file.
pub struct ConcatTranscoder {
    pub invocations: AtomicU32,
}

impl ConcatTranscoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            invocations: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Transcoder for ConcatTranscoder {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let mut merged = tokio::fs::read(video).await?;
        merged.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, merged).await?;
        Ok(())
    }

    fn capabilities(&self) -> TranscoderCapabilities {
        TranscoderCapabilities { can_merge: true }
    }

    fn name(&self) -> &'static str {
        "concat-stub"
    }
}

/// Serves a fixed body the way the platform CDN does: honors
/// `Range: bytes=N-` with 206/416, with an optional per-response delay.
pub struct RangeResponder {
    body: Vec<u8>,
    delay: Option<Duration>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body, delay: None }
    }

    pub fn with_delay(body: Vec<u8>, delay: Duration) -> Self {
        Self {
            body,
            delay: Some(delay),
        }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let offset = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.strip_suffix("-"))
            .and_then(|v| v.parse::<usize>().ok());

        let template = match offset {
            Some(offset) if offset >= self.body.len() => ResponseTemplate::new(416),
            Some(offset) => ResponseTemplate::new(206)
                .insert_header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", offset, self.body.len() - 1, self.body.len())
                        .as_str(),
                )
                .set_body_bytes(self.body[offset..].to_vec()),
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        };

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// Deterministic pseudo-random test payload.
pub fn test_body(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

/// Drive a state receiver until `predicate` matches, with a generous timeout.
pub async fn wait_for<F>(rx: &mut watch::Receiver<SessionState>, mut predicate: F) -> SessionState
where
    F: FnMut(&SessionState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            {
                let current = rx.borrow_and_update().clone();
                if predicate(&current) {
                    return current;
                }
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("expected state not reached within timeout")
}

/// Collect every state observed (watch may coalesce bursts) until one
/// matches `done`, returning the observation sequence.
pub async fn collect_until<F>(
    rx: &mut watch::Receiver<SessionState>,
    mut done: F,
) -> Vec<SessionState>
where
    F: FnMut(&SessionState) -> bool,
{
    let mut observed = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = rx.borrow_and_update().clone();
            let finished = done(&current);
            observed.push(current);
            if finished {
                break;
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("terminal state not reached within timeout");
    observed
}

/// Allow the supervisor's background task to fully settle after a pause,
/// then resume; retries while the previous run is still winding down.
pub async fn resume_when_settled(supervisor: &bili_dl::TaskSupervisor) {
    for _ in 0..100 {
        match supervisor.resume().await {
            Err(Error::AlreadyRunning) => tokio::time::sleep(Duration::from_millis(10)).await,
            other => {
                other.expect("resume failed");
                return;
            }
        }
    }
    panic!("previous run never settled enough to resume");
}
