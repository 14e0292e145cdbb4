//! # bili-dl
//!
//! Embeddable download core for WBI-signed media resources: signs metadata
//! requests, downloads each elementary stream resiliently over HTTP range
//! requests, merges them through an external transcoder, and delivers the
//! result — broadcasting progress on a replay-1 state channel the whole way.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to states, no polling required
//! - **Cooperative control** - Pause keeps partial files and resumes from
//!   the last byte on disk; cancel discards them; neither is an error
//! - **Injected collaborators** - The metadata API, transcoder, storage and
//!   keep-alive context are traits supplied by the embedder
//!
//! ## Quick Start
//!
//! ```no_run
//! use bili_dl::{Config, TaskSupervisor};
//! use bili_dl::types::DownloadParams;
//! # use bili_dl::resolver::StreamResolver;
//! # async fn example(resolver: std::sync::Arc<dyn StreamResolver>) -> bili_dl::Result<()> {
//! let supervisor = TaskSupervisor::with_defaults(Config::default(), resolver)?;
//!
//! // Subscribe before starting so no state is missed
//! let mut states = supervisor.subscribe();
//! tokio::spawn(async move {
//!     while states.changed().await.is_ok() {
//!         println!("state: {:?}", *states.borrow_and_update());
//!     }
//! });
//!
//! supervisor.start(DownloadParams {
//!     resource_id: "BV1GJ411x7h7".into(),
//!     sub_resource_id: 239927346,
//!     quality: 80,
//!     preferred_codec: None,
//!     audio_only: false,
//!     output_name: "clip.mp4".into(),
//! }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Execution context (keep-alive) seam
pub mod keepalive;
mod orchestrator;
/// Stream resolution seam and selection policy
pub mod resolver;
/// Retry logic with linear backoff
pub mod retry;
/// Replay-1 state broadcast
pub mod state;
/// Storage writer seam
pub mod storage;
/// Task supervision (start/pause/resume/cancel)
pub mod supervisor;
/// External transcoder seam
pub mod transcoder;
/// Resumable chunked HTTP transfer
pub mod transfer;
/// Core types and session states
pub mod types;
/// WBI request signing
pub mod wbi;

// Re-export commonly used types
pub use config::{Config, NetworkConfig, PhaseWeights, RetryConfig};
pub use error::{Error, Result};
pub use keepalive::{ExecutionContext, KeepAlive, NoopExecutionContext};
pub use resolver::{ResolvedStreams, StreamResolver};
pub use state::StateChannel;
pub use storage::{LocalStorageWriter, StorageWriter};
pub use supervisor::TaskSupervisor;
pub use transcoder::{CliTranscoder, NoOpTranscoder, Transcoder};
pub use transfer::ChunkedTransfer;
pub use types::{DownloadParams, SessionState, StreamDescriptor, StreamKind};
pub use wbi::{MixinKey, ParameterSet, SignedQuery, derive_mixin_key, sign, sign_at};
