//! Multi-phase transfer orchestration
//!
//! Drives one download run through its fixed phase order:
//!
//! `Resolving → TransferringPrimary → TransferringSecondary → Merging →
//! Finalizing`
//!
//! Each phase owns a contiguous sub-range of the overall [0, 1] progress
//! interval; per-phase local progress is composed into one overall value
//! that is clamped monotonically nondecreasing across the whole run. Any
//! phase failure aborts the remaining phases immediately; temp files are
//! retained on failure so the run can be resumed or diagnosed.

use crate::config::{Config, PhaseWeights};
use crate::error::{Error, Result};
use crate::resolver::{StreamResolver, select_stream};
use crate::state::StateChannel;
use crate::storage::StorageWriter;
use crate::transcoder::Transcoder;
use crate::transfer::ChunkedTransfer;
use crate::types::{DownloadParams, SessionState, StreamDescriptor, StreamKind};
use crate::wbi;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Pipeline phase, in fixed execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Resolving,
    TransferringPrimary,
    TransferringSecondary,
    Merging,
    Finalizing,
}

/// The [start, end) slice of the overall progress interval a phase owns.
///
/// Audio-only runs have no secondary stream, so the primary phase widens to
/// absorb the secondary's range and the split stays contiguous.
pub(crate) fn phase_span(weights: &PhaseWeights, phase: Phase, audio_only: bool) -> (f64, f64) {
    match phase {
        Phase::Resolving => (0.0, weights.resolve_end),
        Phase::TransferringPrimary => {
            if audio_only {
                (weights.resolve_end, weights.secondary_end)
            } else {
                (weights.resolve_end, weights.primary_end)
            }
        }
        Phase::TransferringSecondary => (weights.primary_end, weights.secondary_end),
        Phase::Merging => (weights.secondary_end, weights.merge_end),
        Phase::Finalizing => (weights.merge_end, 1.0),
    }
}

/// Compose a phase's local fraction into the overall progress value.
pub(crate) fn compose(span: (f64, f64), local: f64) -> f64 {
    let local = local.clamp(0.0, 1.0);
    span.0 + local * (span.1 - span.0)
}

/// Everything one run needs, grouped to avoid long parameter lists.
pub(crate) struct OrchestratorContext {
    pub(crate) params: DownloadParams,
    pub(crate) config: Arc<Config>,
    pub(crate) transfer: ChunkedTransfer,
    pub(crate) resolver: Arc<dyn StreamResolver>,
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) storage: Arc<dyn StorageWriter>,
    pub(crate) states: Arc<StateChannel>,
    pub(crate) cancel: CancellationToken,
}

/// One pipeline run over a single resource
///
/// Exactly one orchestrator may own a resource's temp files at a time; the
/// supervisor enforces that by rejecting concurrent starts.
pub(crate) struct TransferOrchestrator {
    ctx: OrchestratorContext,
    /// Highest overall fraction published so far; publications are clamped
    /// against it so composed progress never regresses (e.g. when a server
    /// ignores a range request and a stream restarts from zero).
    last_fraction: Mutex<f64>,
}

impl TransferOrchestrator {
    pub(crate) fn new(ctx: OrchestratorContext) -> Self {
        Self {
            ctx,
            last_fraction: Mutex::new(0.0),
        }
    }

    /// Execute the full pipeline, returning the delivered file's final path.
    ///
    /// The caller (supervisor) holds the keep-alive guard and publishes the
    /// terminal state; this method publishes `Loading` progress along the way.
    pub(crate) async fn run(&self) -> Result<PathBuf> {
        let params = &self.ctx.params;
        tracing::info!(
            resource_id = %params.resource_id,
            sub_resource_id = params.sub_resource_id,
            quality = params.quality,
            audio_only = params.audio_only,
            "starting download run"
        );

        tokio::fs::create_dir_all(&self.ctx.config.download.temp_dir).await?;

        // Phase 1: resolve signed stream URLs (cancellable like every
        // suspension point, even though the resolver is an external call)
        self.publish(Phase::Resolving, 0.0, "resolving streams");
        let (video, audio) = tokio::select! {
            _ = self.ctx.cancel.cancelled() => return Err(Error::Cancelled),
            resolved = self.resolve() => resolved?,
        };
        self.publish(Phase::Resolving, 1.0, "streams resolved");

        let temp_dir = self.ctx.config.download.temp_dir.clone();
        let audio_path = temp_dir.join(params.temp_file_name(StreamKind::Audio));
        let video_path = temp_dir.join(params.temp_file_name(StreamKind::Video));

        // Phase 2: primary stream (video, or audio when audio-only)
        if params.audio_only {
            self.download_stream(&audio, &audio_path, Phase::TransferringPrimary, "downloading audio stream")
                .await?;
        } else {
            let video = video.as_ref().ok_or_else(|| {
                Error::Resolution("resolver returned no video candidates".to_string())
            })?;
            self.download_stream(video, &video_path, Phase::TransferringPrimary, "downloading video stream")
                .await?;

            // Phase 3: secondary stream
            self.download_stream(&audio, &audio_path, Phase::TransferringSecondary, "downloading audio stream")
                .await?;
        }

        // Phase 4: merge through the external transcoder
        let merged_path = if params.audio_only {
            // Single stream, nothing to merge
            self.publish(Phase::Merging, 1.0, "merge skipped");
            audio_path.clone()
        } else {
            let merged = temp_dir.join(params.merged_file_name());
            self.publish(Phase::Merging, 0.0, "merging streams");
            tracing::debug!(
                transcoder = self.ctx.transcoder.name(),
                output = %merged.display(),
                "invoking transcoder"
            );
            self.ctx
                .transcoder
                .merge(&video_path, &audio_path, &merged, &self.ctx.cancel)
                .await?;
            self.publish(Phase::Merging, 1.0, "streams merged");
            merged
        };

        // Phase 5: hand off to storage, then (and only then) drop temp files
        self.publish(Phase::Finalizing, 0.0, "delivering file");
        let final_path = self
            .ctx
            .storage
            .publish(&merged_path, &params.output_name)
            .await?;
        remove_temp_files(&self.ctx.config, params).await;

        tracing::info!(path = %final_path.display(), "download run complete");
        Ok(final_path)
    }

    /// Resolve the signed request into the streams this run will fetch.
    ///
    /// Returns `(video, audio)`; video is `None` for audio-only requests.
    async fn resolve(&self) -> Result<(Option<StreamDescriptor>, StreamDescriptor)> {
        let params = &self.ctx.params;

        let (fragment_a, fragment_b) = self.ctx.resolver.signing_keys().await?;
        let mixin_key = wbi::derive_mixin_key(&fragment_a, &fragment_b);

        let mut request = wbi::ParameterSet::new();
        request.insert("bvid", &params.resource_id);
        request.insert("cid", params.sub_resource_id);
        request.insert("qn", params.quality);
        request.insert("fnval", 4048);
        request.insert("fourk", 1);
        let query = wbi::sign(&request, &mixin_key);

        let streams = self.ctx.resolver.resolve(&query).await?;
        tracing::debug!(
            video_candidates = streams.video.len(),
            audio_candidates = streams.audio.len(),
            "resolved stream candidates"
        );

        let audio = select_stream(&streams.audio, None, None)
            .cloned()
            .ok_or_else(|| Error::Resolution("resolver returned no audio candidates".to_string()))?;

        let video = if params.audio_only {
            None
        } else {
            Some(
                select_stream(
                    &streams.video,
                    Some(params.quality),
                    params.preferred_codec.as_deref(),
                )
                .cloned()
                .ok_or_else(|| {
                    Error::Resolution("resolver returned no video candidates".to_string())
                })?,
            )
        };

        Ok((video, audio))
    }

    /// Run one chunked transfer, mapping its local progress into the phase's range.
    async fn download_stream(
        &self,
        stream: &StreamDescriptor,
        destination: &std::path::Path,
        phase: Phase,
        message: &str,
    ) -> Result<()> {
        tracing::debug!(
            stream_id = stream.id,
            codecs = %stream.codecs,
            destination = %destination.display(),
            "starting stream transfer"
        );
        self.publish(phase, 0.0, message);
        self.ctx
            .transfer
            .download(&stream.url, destination, &self.ctx.cancel, |local| {
                self.publish(phase, local, message);
            })
            .await
    }

    /// Publish composed progress, clamped nondecreasing across the run.
    fn publish(&self, phase: Phase, local: f64, message: &str) {
        let span = phase_span(&self.ctx.config.phase_weights, phase, self.ctx.params.audio_only);
        let overall = compose(span, local);

        let clamped = {
            #[allow(clippy::unwrap_used)] // lock is never poisoned: no panics while held
            let mut last = self.last_fraction.lock().unwrap();
            if overall > *last {
                *last = overall;
            }
            *last
        };

        self.ctx.states.publish(SessionState::Loading {
            fraction: clamped,
            message: message.to_string(),
        });
    }
}

/// Best-effort removal of a run's temp files (streams and merged output).
///
/// Called after a successful hand-off, and by the supervisor on explicit
/// cancel. Never called on pause or failure, which retain partial files.
pub(crate) async fn remove_temp_files(config: &Config, params: &DownloadParams) {
    let temp_dir = &config.download.temp_dir;
    let names = [
        params.temp_file_name(StreamKind::Video),
        params.temp_file_name(StreamKind::Audio),
        params.merged_file_name(),
    ];
    for name in names {
        let path = temp_dir.join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(_) => tracing::debug!(path = %path.display(), "removed temp file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}
