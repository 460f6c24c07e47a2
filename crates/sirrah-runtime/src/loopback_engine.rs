//! In-process stand-in for the trusted execution engine.
//!
//! Speaks the same lock-step framing over in-memory pipes, so the gateway can
//! run without the enclave binary (local development and tests). Every input
//! frame is answered by one primary and one diagnostic frame computed by a
//! caller-supplied handler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine_process::EngineStreams;
use crate::framed_pipe::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};

const LOOPBACK_PIPE_CAPACITY: usize = 64 * 1024;

/// What the loopback engine does in response to one input frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopbackReply {
    Frames {
        primary: Vec<u8>,
        diagnostic: Vec<u8>,
    },
    /// Writes `partial_primary` without a delimiter and closes every stream.
    Hangup { partial_primary: Vec<u8> },
}

impl LoopbackReply {
    pub fn frames(primary: impl Into<Vec<u8>>, diagnostic: impl Into<Vec<u8>>) -> Self {
        Self::Frames {
            primary: primary.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

type LoopbackHandler = dyn Fn(&[u8]) -> LoopbackReply + Send + Sync;

#[derive(Debug, Default)]
struct LoopbackCounters {
    frames_received: AtomicU64,
    lockstep_violations: AtomicU64,
}

pub struct LoopbackEngine {
    handler: Arc<LoopbackHandler>,
    turn_delay: Duration,
    max_frame_bytes: usize,
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("turn_delay", &self.turn_delay)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish_non_exhaustive()
    }
}

impl LoopbackEngine {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[u8]) -> LoopbackReply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            turn_delay: Duration::ZERO,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Echoes each input frame on the primary stream and reports its size on
    /// the diagnostic stream.
    pub fn echo() -> Self {
        Self::new(|frame| {
            LoopbackReply::frames(frame.to_vec(), format!("loopback: {} bytes", frame.len()))
        })
    }

    /// Simulated compute time between receiving a frame and answering it.
    pub fn with_turn_delay(mut self, turn_delay: Duration) -> Self {
        self.turn_delay = turn_delay;
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// Starts the engine task and returns the gateway-facing streams.
    pub fn spawn(self) -> (LoopbackEngineHandle, EngineStreams) {
        let (gateway_input, engine_input) = duplex(LOOPBACK_PIPE_CAPACITY);
        let (engine_primary, gateway_primary) = duplex(LOOPBACK_PIPE_CAPACITY);
        let (engine_diagnostic, gateway_diagnostic) = duplex(LOOPBACK_PIPE_CAPACITY);

        let counters = Arc::new(LoopbackCounters::default());
        let task = tokio::spawn(run_loopback(
            self,
            engine_input,
            engine_primary,
            engine_diagnostic,
            Arc::clone(&counters),
        ));

        (
            LoopbackEngineHandle { counters, task },
            EngineStreams::new(gateway_input, gateway_primary, gateway_diagnostic),
        )
    }
}

#[derive(Debug)]
pub struct LoopbackEngineHandle {
    counters: Arc<LoopbackCounters>,
    task: JoinHandle<()>,
}

impl LoopbackEngineHandle {
    pub fn frames_received(&self) -> u64 {
        self.counters.frames_received.load(Ordering::SeqCst)
    }

    /// Input that arrived while a previous turn was still unanswered.
    pub fn lockstep_violations(&self) -> u64 {
        self.counters.lockstep_violations.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

async fn run_loopback(
    engine: LoopbackEngine,
    input: DuplexStream,
    mut primary: DuplexStream,
    mut diagnostic: DuplexStream,
    counters: Arc<LoopbackCounters>,
) {
    let mut input = BufReader::new(input);
    loop {
        let frame = match read_frame(&mut input, engine.max_frame_bytes).await {
            Ok(frame) => frame,
            Err(FrameError::Closed { .. }) => {
                debug!("loopback engine input closed");
                return;
            }
            Err(error) => {
                warn!(error = %error, "loopback engine input failed");
                return;
            }
        };
        counters.frames_received.fetch_add(1, Ordering::SeqCst);

        if !engine.turn_delay.is_zero() {
            tokio::time::sleep(engine.turn_delay).await;
        }
        if has_pending_input(&mut input).await {
            counters.lockstep_violations.fetch_add(1, Ordering::SeqCst);
            warn!("loopback engine received input before answering the previous frame");
        }

        match (engine.handler)(&frame) {
            LoopbackReply::Frames {
                primary: primary_frame,
                diagnostic: diagnostic_frame,
            } => {
                if let Err(error) = write_frame(&mut primary, &primary_frame).await {
                    warn!(error = %error, "loopback engine primary write failed");
                    return;
                }
                if let Err(error) = write_frame(&mut diagnostic, &diagnostic_frame).await {
                    warn!(error = %error, "loopback engine diagnostic write failed");
                    return;
                }
            }
            LoopbackReply::Hangup { partial_primary } => {
                let _ = primary.write_all(&partial_primary).await;
                let _ = primary.flush().await;
                debug!("loopback engine hanging up");
                return;
            }
        }
    }
}

async fn has_pending_input(input: &mut BufReader<DuplexStream>) -> bool {
    match tokio::time::timeout(Duration::ZERO, input.fill_buf()).await {
        Ok(Ok(buffered)) => !buffered.is_empty(),
        _ => false,
    }
}
