//! Unrecoverable engine channel faults and the process-wide signal that
//! carries the first one to the top-level server loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::error;

use crate::readiness::ReadinessController;

/// Identifies which engine byte stream (or the process itself) faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStream {
    Input,
    Primary,
    Diagnostic,
    Process,
}

impl EngineStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Primary => "primary",
            Self::Diagnostic => "diagnostic",
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for EngineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broken engine channel. The lock-step state is unknown once one exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine {stream} stream fault: {detail}")]
pub struct ChannelFault {
    pub stream: EngineStream,
    pub detail: String,
}

impl ChannelFault {
    pub fn new(stream: EngineStream, detail: impl ToString) -> Self {
        Self {
            stream,
            detail: detail.to_string(),
        }
    }
}

/// Records the first fatal fault and wakes whoever is waiting to shut down.
///
/// Cloning is cheap; all clones share one fault slot. Only the first call to
/// [`FatalFaultSupervisor::trip`] is recorded.
#[derive(Debug, Clone)]
pub struct FatalFaultSupervisor {
    inner: Arc<FatalFaultState>,
}

#[derive(Debug)]
struct FatalFaultState {
    fault: watch::Sender<Option<ChannelFault>>,
    trip_count: AtomicU64,
    readiness: Option<ReadinessController>,
}

impl Default for FatalFaultSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalFaultSupervisor {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Flips `readiness` to not-ready the moment a fault is recorded, so the
    /// readiness probe fails before the process goes away.
    pub fn with_readiness(readiness: ReadinessController) -> Self {
        Self::build(Some(readiness))
    }

    fn build(readiness: Option<ReadinessController>) -> Self {
        let (fault, _) = watch::channel(None);
        Self {
            inner: Arc::new(FatalFaultState {
                fault,
                trip_count: AtomicU64::new(0),
                readiness,
            }),
        }
    }

    /// Returns `true` only for the call that recorded the fault.
    pub fn trip(&self, fault: ChannelFault) -> bool {
        self.inner.trip_count.fetch_add(1, Ordering::SeqCst);
        let mut pending = Some(fault);
        let recorded = self.inner.fault.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = pending.take();
            true
        });
        if !recorded {
            return false;
        }

        if let Some(readiness) = &self.inner.readiness {
            readiness.mark_not_ready();
        }
        if let Some(fault) = self.fault() {
            error!(
                stream = fault.stream.as_str(),
                error = %fault,
                "fatal engine fault recorded, requesting process shutdown"
            );
        }
        true
    }

    pub fn fault(&self) -> Option<ChannelFault> {
        self.inner.fault.borrow().clone()
    }

    pub fn is_tripped(&self) -> bool {
        self.inner.fault.borrow().is_some()
    }

    /// Number of times `trip` was called, recorded or not.
    pub fn trip_count(&self) -> u64 {
        self.inner.trip_count.load(Ordering::SeqCst)
    }

    /// Resolves with the recorded fault, immediately if one already exists.
    pub async fn wait(&self) -> ChannelFault {
        let mut receiver = self.inner.fault.subscribe();
        loop {
            if let Some(fault) = receiver.borrow_and_update().clone() {
                return fault;
            }
            if receiver.changed().await.is_err() {
                // The sender lives in `self.inner`, so this only happens if the
                // state is torn down underneath us.
                std::future::pending::<()>().await;
            }
        }
    }
}
