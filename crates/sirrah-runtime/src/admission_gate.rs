//! Single-slot, deadline-aware admission gate.
//!
//! The gate owns the guarded resource. Holding an [`ExecutionTicket`] is the
//! only way to reach it, and dropping the ticket is the only way to release
//! the slot, so every successful acquire is released exactly once.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::metrics::{duration_us, MetricEvent, MetricsSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline exceeded after waiting {waited_us}us for the engine")]
pub struct AdmissionTimeout {
    pub waited_us: u64,
}

pub struct AdmissionGate<T> {
    slot: Arc<Mutex<T>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<T> std::fmt::Debug for AdmissionGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("occupied", &self.is_occupied())
            .finish_non_exhaustive()
    }
}

impl<T> AdmissionGate<T> {
    pub fn new(resource: T, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(resource)),
            metrics,
        }
    }

    /// Waits for the slot until `deadline`.
    ///
    /// A free slot is granted even when `deadline` has already passed.
    pub async fn acquire(&self, deadline: Instant) -> Result<ExecutionTicket<T>, AdmissionTimeout> {
        let started = Instant::now();
        let waiting = Arc::clone(&self.slot).lock_owned();
        match tokio::time::timeout_at(deadline, waiting).await {
            Ok(guard) => {
                self.metrics.record(MetricEvent::GateWait {
                    duration_us: duration_us(started.elapsed()),
                });
                Ok(ExecutionTicket { guard })
            }
            Err(_) => {
                let waited_us = duration_us(started.elapsed());
                self.metrics.record(MetricEvent::GateTimeout {
                    duration_us: waited_us,
                });
                Err(AdmissionTimeout { waited_us })
            }
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}

/// Exclusive access to the gated resource; the slot frees on drop.
pub struct ExecutionTicket<T> {
    guard: OwnedMutexGuard<T>,
}

impl<T> std::fmt::Debug for ExecutionTicket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTicket").finish_non_exhaustive()
    }
}

impl<T> Deref for ExecutionTicket<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for ExecutionTicket<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::{MetricsRegistry, NoopMetricsSink};

    fn gate_with_registry(resource: u32) -> (AdmissionGate<u32>, Arc<MetricsRegistry>) {
        let registry = Arc::new(MetricsRegistry::new());
        let gate = AdmissionGate::new(resource, Arc::clone(&registry) as Arc<dyn MetricsSink>);
        (gate, registry)
    }

    #[tokio::test]
    async fn unit_acquire_grants_free_slot_and_release_on_drop() {
        let (gate, registry) = gate_with_registry(7);
        let deadline = Instant::now() + Duration::from_secs(1);

        let mut ticket = gate.acquire(deadline).await.expect("free slot");
        assert!(gate.is_occupied());
        *ticket += 1;
        drop(ticket);
        assert!(!gate.is_occupied());

        let ticket = gate.acquire(deadline).await.expect("slot released");
        assert_eq!(*ticket, 8);
        assert_eq!(registry.snapshot().engine_lock_wait.count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_deadline_expires_while_slot_is_held() {
        let (gate, registry) = gate_with_registry(0);
        let holder = gate
            .acquire(Instant::now() + Duration::from_secs(1))
            .await
            .expect("first holder");

        let timeout = gate
            .acquire(Instant::now() + Duration::from_millis(250))
            .await
            .expect_err("slot is held");
        assert!(timeout.waited_us >= 250_000);
        assert!(gate.is_occupied());

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.engine_lock_timeout.count, 1);
        assert_eq!(snapshot.engine_lock_timeout.sum_us, timeout.waited_us);

        drop(holder);
        gate.acquire(Instant::now())
            .await
            .expect("original holder release makes slot available");
    }

    #[tokio::test(start_paused = true)]
    async fn functional_waiter_is_granted_when_holder_releases_before_deadline() {
        let gate = Arc::new(AdmissionGate::new(0_u32, Arc::new(NoopMetricsSink)));
        let holder = gate
            .acquire(Instant::now() + Duration::from_secs(1))
            .await
            .expect("first holder");

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.acquire(Instant::now() + Duration::from_secs(5))
                    .await
                    .map(|ticket| *ticket)
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(holder);
        let granted = waiter.await.expect("waiter joins");
        assert_eq!(granted, Ok(0));
    }

    #[tokio::test]
    async fn regression_past_deadline_still_grants_a_free_slot() {
        let gate = AdmissionGate::new((), Arc::new(NoopMetricsSink));
        let deadline = Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(gate.acquire(deadline).await.is_ok());
    }
}
