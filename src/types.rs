//! Core types for bili-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which elementary stream of a resource a transfer carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Video elementary stream
    Video,
    /// Audio elementary stream
    Audio,
}

impl StreamKind {
    /// Stable lowercase name, used in deterministic temp file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one selectable elementary stream of a resource
///
/// Produced by the metadata/resolution API; immutable once deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Platform quality/stream identifier
    pub id: u32,
    /// Codec string (e.g., "avc1.640032", "hev1.1.6.L120.90")
    #[serde(default)]
    pub codecs: String,
    /// Bandwidth in bits per second, used as the fallback selection key
    #[serde(default)]
    pub bandwidth: u64,
    /// Direct CDN URL for this stream
    pub url: String,
}

/// Caller-supplied request for one download run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadParams {
    /// Platform resource identifier (e.g., a bvid)
    pub resource_id: String,
    /// Sub-resource identifier (e.g., a cid selecting one part)
    pub sub_resource_id: u64,
    /// Preferred quality/stream id
    pub quality: u32,
    /// Preferred codec prefix; None accepts any codec
    #[serde(default)]
    pub preferred_codec: Option<String>,
    /// Fetch only the audio stream and skip the merge step
    #[serde(default)]
    pub audio_only: bool,
    /// File name the finished download is delivered under
    pub output_name: String,
}

impl DownloadParams {
    /// Deterministic temp file name for one of this request's streams.
    ///
    /// The name is a pure function of the request, so a resumed run (even
    /// after a process restart) addresses the same partial file.
    pub fn temp_file_name(&self, kind: StreamKind) -> String {
        format!(
            "{}_{}_{}.tmp",
            self.resource_id, self.sub_resource_id, kind
        )
    }

    /// Deterministic temp file name for the merged output awaiting delivery.
    ///
    /// Carries a real container extension so the external transcoder can
    /// infer the output format from the name.
    pub fn merged_file_name(&self) -> String {
        format!("{}_{}_merged.mp4", self.resource_id, self.sub_resource_id)
    }
}

/// Current status of a download session
///
/// Exactly one value is current at any time; the state channel replays the
/// latest value to new subscribers. Consumers must match exhaustively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionState {
    /// No run has started yet
    Idle,
    /// A run is in progress
    Loading {
        /// Overall progress in [0, 1), phase-weighted
        fraction: f64,
        /// Human-readable description of the current phase
        message: String,
    },
    /// The run finished and the file was delivered
    Success {
        /// Final path of the delivered file
        path: PathBuf,
    },
    /// The run failed; partial files are retained for resume or diagnosis
    Error {
        /// Human-readable failure reason
        reason: String,
    },
    /// The run was paused; partial files are retained for resume
    Paused {
        /// Overall progress at the time of the pause
        fraction: f64,
    },
    /// The run was cancelled and partial files were discarded
    Cancelled,
}

impl SessionState {
    /// The overall progress this state represents.
    ///
    /// `Success` is by definition 1.0; only `Success` ever reports 1.0.
    pub fn fraction(&self) -> f64 {
        match self {
            SessionState::Idle => 0.0,
            SessionState::Loading { fraction, .. } => fraction.clamp(0.0, 0.999_999),
            SessionState::Success { .. } => 1.0,
            SessionState::Error { .. } => 0.0,
            SessionState::Paused { fraction } => *fraction,
            SessionState::Cancelled => 0.0,
        }
    }

    /// True once the run has reached an end state (success, failure, or cancel).
    ///
    /// `Paused` is not terminal: the session can be resumed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Success { .. } | SessionState::Error { .. } | SessionState::Cancelled
        )
    }
}
