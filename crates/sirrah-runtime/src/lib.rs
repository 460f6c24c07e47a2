//! Engine-facing runtime for the sirrah execution gateway.
//!
//! Supervises the trusted execution engine subprocess, speaks the lock-step
//! framed protocol over its pipes, serializes callers through a single-slot
//! admission gate, and escalates stream corruption to a process-wide fatal
//! fault. Readiness and metric primitives shared with the HTTP layer live
//! here too.

pub mod admission_gate;
pub mod engine_process;
pub mod execution_coordinator;
pub mod fatal_fault;
pub mod framed_pipe;
pub mod loopback_engine;
pub mod metrics;
pub mod readiness;

pub use admission_gate::*;
pub use engine_process::*;
pub use execution_coordinator::*;
pub use fatal_fault::*;
pub use framed_pipe::*;
pub use loopback_engine::*;
pub use metrics::*;
pub use readiness::*;
