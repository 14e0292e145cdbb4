//! Task supervision — the external control surface
//!
//! One [`TaskSupervisor`] wraps at most one active run at a time. `start`
//! spawns the orchestrator on a background tokio task after acquiring the
//! host's keep-alive guard; `pause`/`cancel` signal the run cooperatively
//! through its cancellation token, and `resume` restarts with the retained
//! parameters — deterministic temp paths make the new run continue from the
//! partial files on disk.
//!
//! Callers never poll: they subscribe to the state channel and observe
//! `Loading` progress followed by exactly one settled state per run
//! (`Success`, `Error`, `Paused`, or `Cancelled`).

use crate::config::Config;
use crate::error::{Error, Result};
use crate::keepalive::{ExecutionContext, NoopExecutionContext};
use crate::orchestrator::{OrchestratorContext, TransferOrchestrator, remove_temp_files};
use crate::resolver::StreamResolver;
use crate::state::StateChannel;
use crate::storage::{LocalStorageWriter, StorageWriter};
use crate::transcoder::{CliTranscoder, NoOpTranscoder, Transcoder};
use crate::transfer::ChunkedTransfer;
use crate::types::{DownloadParams, SessionState};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// Bookkeeping for the one in-flight run.
struct ActiveRun {
    cancel: CancellationToken,
    /// Distinguishes a pause (retain partial files, publish `Paused`) from a
    /// cancel (delete partial files, publish `Cancelled`) when the
    /// orchestrator reports back `Cancelled`.
    pause_requested: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

/// External control surface for one download session
///
/// All collaborators are constructor-injected; the supervisor owns the
/// state channel and the single HTTP client for the session.
///
/// # Examples
///
/// ```no_run
/// use bili_dl::{Config, TaskSupervisor};
/// use bili_dl::types::DownloadParams;
/// # use bili_dl::resolver::StreamResolver;
/// # async fn example(resolver: std::sync::Arc<dyn StreamResolver>) -> bili_dl::Result<()> {
/// let supervisor = TaskSupervisor::with_defaults(Config::default(), resolver)?;
///
/// let mut states = supervisor.subscribe();
/// supervisor.start(DownloadParams {
///     resource_id: "BV1GJ411x7h7".into(),
///     sub_resource_id: 239927346,
///     quality: 80,
///     preferred_codec: None,
///     audio_only: false,
///     output_name: "clip.mp4".into(),
/// }).await?;
///
/// while states.changed().await.is_ok() {
///     let state = states.borrow_and_update().clone();
///     println!("{state:?}");
///     if state.is_terminal() {
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct TaskSupervisor {
    config: Arc<Config>,
    client: reqwest::Client,
    resolver: Arc<dyn StreamResolver>,
    transcoder: Arc<dyn Transcoder>,
    storage: Arc<dyn StorageWriter>,
    context: Arc<dyn ExecutionContext>,
    states: Arc<StateChannel>,
    active: Mutex<Option<ActiveRun>>,
    last_params: Mutex<Option<DownloadParams>>,
}

impl TaskSupervisor {
    /// Create a supervisor with explicit collaborators.
    ///
    /// Validates the configuration and builds the session's single HTTP
    /// client (one instance per supervisor, shared by every transfer).
    pub fn new(
        config: Config,
        resolver: Arc<dyn StreamResolver>,
        transcoder: Arc<dyn Transcoder>,
        storage: Arc<dyn StorageWriter>,
        context: Arc<dyn ExecutionContext>,
    ) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.network.connect_timeout)
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            client,
            resolver,
            transcoder,
            storage,
            context,
            states: Arc::new(StateChannel::new()),
            active: Mutex::new(None),
            last_params: Mutex::new(None),
        })
    }

    /// Create a supervisor with default local collaborators.
    ///
    /// The transcoder is resolved from the tools configuration: an explicit
    /// `ffmpeg_path` wins, then PATH discovery, then a no-op fallback that
    /// fails merges with a clear message. Storage delivers into the
    /// configured download directory; the execution context is a no-op.
    pub fn with_defaults(config: Config, resolver: Arc<dyn StreamResolver>) -> Result<Self> {
        let transcoder: Arc<dyn Transcoder> = if let Some(ref ffmpeg_path) = config.tools.ffmpeg_path
        {
            Arc::new(CliTranscoder::new(ffmpeg_path.clone()))
        } else if config.tools.search_path {
            CliTranscoder::from_path()
                .map(|t| Arc::new(t) as Arc<dyn Transcoder>)
                .unwrap_or_else(|| Arc::new(NoOpTranscoder))
        } else {
            Arc::new(NoOpTranscoder)
        };
        tracing::info!(
            transcoder = transcoder.name(),
            can_merge = transcoder.capabilities().can_merge,
            "transcoder initialized"
        );

        let storage = Arc::new(LocalStorageWriter::new(config.download.download_dir.clone()));

        Self::new(
            config,
            resolver,
            transcoder,
            storage,
            Arc::new(NoopExecutionContext),
        )
    }

    /// Subscribe to session state updates.
    ///
    /// The receiver immediately observes the latest state, then every
    /// subsequent one. Multiple subscribers are supported; none can slow the
    /// transfer down.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.states.subscribe()
    }

    /// The session state as of right now.
    pub fn current_state(&self) -> SessionState {
        self.states.current()
    }

    /// Start a download run.
    ///
    /// Rejected with [`Error::AlreadyRunning`] while another run is active:
    /// concurrent runs would contend for the same temp files, so a second
    /// start is refused, not queued. Acquires the execution context's
    /// keep-alive guard for the whole run, including the brief linger after
    /// a terminal state.
    pub async fn start(&self, params: DownloadParams) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref()
            && !run.handle.is_finished()
        {
            tracing::warn!(
                resource_id = %params.resource_id,
                "start rejected: a run is already active"
            );
            return Err(Error::AlreadyRunning);
        }

        let keep_alive = self.context.acquire().await?;
        let cancel = CancellationToken::new();
        let pause_requested = Arc::new(AtomicBool::new(false));
        *self.last_params.lock().await = Some(params.clone());

        let ctx = OrchestratorContext {
            params: params.clone(),
            config: self.config.clone(),
            transfer: ChunkedTransfer::new(self.client.clone(), &self.config),
            resolver: self.resolver.clone(),
            transcoder: self.transcoder.clone(),
            storage: self.storage.clone(),
            states: self.states.clone(),
            cancel: cancel.clone(),
        };

        let states = self.states.clone();
        let config = self.config.clone();
        let pause_flag = pause_requested.clone();
        let linger = self.config.download.teardown_linger;

        let handle = tokio::spawn(async move {
            let keep_alive = keep_alive;
            let orchestrator = TransferOrchestrator::new(ctx);

            match orchestrator.run().await {
                Ok(path) => {
                    states.publish(SessionState::Success { path });
                    tokio::time::sleep(linger).await;
                }
                Err(Error::Cancelled) => {
                    if pause_flag.load(Ordering::SeqCst) {
                        let fraction = states.current().fraction();
                        tracing::info!(fraction, "run paused, partial files retained");
                        states.publish(SessionState::Paused { fraction });
                    } else {
                        tracing::info!("run cancelled, removing partial files");
                        remove_temp_files(&config, &params).await;
                        states.publish(SessionState::Cancelled);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, code = e.code(), "download run failed");
                    states.publish(SessionState::Error {
                        reason: e.to_string(),
                    });
                    tokio::time::sleep(linger).await;
                }
            }

            // Only now may the host suspend us
            drop(keep_alive);
        });

        *active = Some(ActiveRun {
            cancel,
            pause_requested,
            handle,
        });
        Ok(())
    }

    /// Pause the in-flight run, keeping its partial files.
    ///
    /// `Paused(fraction)` is published once the transfer has actually
    /// halted. A no-op when nothing is running.
    pub async fn pause(&self) -> Result<()> {
        let active = self.active.lock().await;
        if let Some(run) = active.as_ref()
            && !run.handle.is_finished()
        {
            run.pause_requested.store(true, Ordering::SeqCst);
            run.cancel.cancel();
        }
        Ok(())
    }

    /// Resume the last run from its partial files.
    ///
    /// Re-invokes [`start`](Self::start) with the retained parameters; the
    /// deterministic temp paths make each resumed transfer continue from the
    /// bytes already on disk.
    pub async fn resume(&self) -> Result<()> {
        let params = self
            .last_params
            .lock()
            .await
            .clone()
            .ok_or(Error::NothingToResume)?;
        self.start(params).await
    }

    /// Cancel the session, discarding partial files.
    ///
    /// Works both on an in-flight run (stops it first) and on a paused
    /// session (deletes the retained partial files directly). Publishes
    /// `Cancelled` either way; a no-op when there is nothing to cancel.
    pub async fn cancel(&self) -> Result<()> {
        let active = self.active.lock().await;
        if let Some(run) = active.as_ref()
            && !run.handle.is_finished()
        {
            run.pause_requested.store(false, Ordering::SeqCst);
            run.cancel.cancel();
            return Ok(());
        }
        drop(active);

        // Paused session: the run already ended, clean up its leftovers here
        if let Some(params) = self.last_params.lock().await.clone()
            && matches!(self.states.current(), SessionState::Paused { .. })
        {
            remove_temp_files(&self.config, &params).await;
            self.states.publish(SessionState::Cancelled);
        }
        Ok(())
    }

    /// Stop any active run and wait for its background task to finish.
    ///
    /// Intended for orderly embedder shutdown; the session state afterwards
    /// reflects how the run ended.
    pub async fn shutdown(&self) {
        let run = self.active.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            if let Err(e) = run.handle.await {
                tracing::warn!(error = %e, "background task ended abnormally during shutdown");
            }
        }
    }
}
