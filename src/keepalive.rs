//! Execution context seam — keeping the host alive for the run's duration
//!
//! Some hosts suspend background work under memory or battery pressure. The
//! supervisor acquires a keep-alive guard before starting a run and holds it
//! until the terminal state has been published; how the guard is obtained is
//! entirely the host's concern.

use crate::error::Result;
use async_trait::async_trait;

/// A held keep-alive; releasing it (dropping) tells the host the run is over.
pub trait KeepAlive: Send {}

/// External execution-context collaborator
///
/// The core only requires that a context exist which "runs until told to
/// stop". Acquisition might register a foreground service, take a wake
/// lock, or do nothing at all on hosts without suspension pressure.
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Acquire a keep-alive guard for the duration of one run.
    async fn acquire(&self) -> Result<Box<dyn KeepAlive>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Execution context for hosts with no suspension pressure
///
/// The default collaborator on desktop and server targets: acquiring it is
/// free and the guard holds nothing.
pub struct NoopExecutionContext;

struct NoopKeepAlive;

impl KeepAlive for NoopKeepAlive {}

#[async_trait]
impl ExecutionContext for NoopExecutionContext {
    async fn acquire(&self) -> Result<Box<dyn KeepAlive>> {
        Ok(Box::new(NoopKeepAlive))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
