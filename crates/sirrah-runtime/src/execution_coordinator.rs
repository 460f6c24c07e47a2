//! One lock-step turn against the engine per call, serialized by the
//! admission gate.

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::time::Instant;
use tracing::error;

use crate::admission_gate::{AdmissionGate, AdmissionTimeout, ExecutionTicket};
use crate::engine_process::EngineStreams;
use crate::fatal_fault::{ChannelFault, EngineStream, FatalFaultSupervisor};
use crate::framed_pipe::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
use crate::metrics::MetricsSink;

/// The two frames produced by one engine turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub primary: Vec<u8>,
    pub diagnostic: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Timeout(#[from] AdmissionTimeout),
    #[error(transparent)]
    Fatal(#[from] ChannelFault),
}

impl ExecutionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionCoordinatorConfig {
    pub max_frame_bytes: usize,
}

impl Default for ExecutionCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct ExecutionCoordinator {
    gate: AdmissionGate<EngineStreams>,
    faults: FatalFaultSupervisor,
    poisoned: Arc<OnceLock<ChannelFault>>,
    max_frame_bytes: usize,
}

impl ExecutionCoordinator {
    pub fn new(
        streams: EngineStreams,
        config: ExecutionCoordinatorConfig,
        faults: FatalFaultSupervisor,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            gate: AdmissionGate::new(streams, metrics),
            faults,
            poisoned: Arc::new(OnceLock::new()),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    /// Sends `payload` as one frame and returns the primary and diagnostic
    /// answers.
    ///
    /// `deadline` bounds only the wait for the engine. Once admitted, the turn
    /// runs to completion on its own task even if the returned future is
    /// dropped. A stream fault poisons the coordinator for good.
    pub async fn run(
        &self,
        payload: Vec<u8>,
        deadline: Instant,
    ) -> Result<EngineOutput, ExecutionError> {
        if let Some(fault) = self.poisoned_fault() {
            return Err(ExecutionError::Fatal(fault));
        }
        let ticket = self.gate.acquire(deadline).await?;
        if let Some(fault) = self.poisoned_fault() {
            return Err(ExecutionError::Fatal(fault));
        }

        let turn = tokio::spawn(run_turn(
            ticket,
            payload,
            self.max_frame_bytes,
            Arc::clone(&self.poisoned),
            self.faults.clone(),
        ));
        match turn.await {
            Ok(outcome) => outcome.map_err(ExecutionError::Fatal),
            Err(join_error) => {
                let fault = ChannelFault::new(
                    EngineStream::Process,
                    format!("engine turn task failed: {join_error}"),
                );
                Err(ExecutionError::Fatal(escalate(
                    &self.poisoned,
                    &self.faults,
                    fault,
                )))
            }
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.get().is_some()
    }

    pub fn poisoned_fault(&self) -> Option<ChannelFault> {
        self.poisoned.get().cloned()
    }

    /// Whether a turn currently holds the engine.
    pub fn is_busy(&self) -> bool {
        self.gate.is_occupied()
    }
}

async fn run_turn(
    mut ticket: ExecutionTicket<EngineStreams>,
    payload: Vec<u8>,
    max_frame_bytes: usize,
    poisoned: Arc<OnceLock<ChannelFault>>,
    faults: FatalFaultSupervisor,
) -> Result<EngineOutput, ChannelFault> {
    let outcome = exchange_frames(&mut ticket, &payload, max_frame_bytes).await;
    // Poison before the ticket is released so queued callers see it.
    let outcome = outcome.map_err(|fault| escalate(&poisoned, &faults, fault));
    drop(ticket);
    outcome
}

async fn exchange_frames(
    streams: &mut EngineStreams,
    payload: &[u8],
    max_frame_bytes: usize,
) -> Result<EngineOutput, ChannelFault> {
    write_frame(&mut streams.input, payload)
        .await
        .map_err(|error| ChannelFault::new(EngineStream::Input, error))?;
    let primary = read_frame(&mut streams.primary, max_frame_bytes)
        .await
        .map_err(|error| ChannelFault::new(EngineStream::Primary, error))?;
    let diagnostic = read_frame(&mut streams.diagnostic, max_frame_bytes)
        .await
        .map_err(|error| ChannelFault::new(EngineStream::Diagnostic, error))?;
    Ok(EngineOutput {
        primary,
        diagnostic,
    })
}

fn escalate(
    poisoned: &OnceLock<ChannelFault>,
    faults: &FatalFaultSupervisor,
    fault: ChannelFault,
) -> ChannelFault {
    if poisoned.set(fault.clone()).is_ok() {
        error!(
            stream = fault.stream.as_str(),
            error = %fault,
            "engine stream corrupted, cannot recover"
        );
        faults.trip(fault.clone());
    }
    fault
}
