//! Process-wide readiness flag consumed by external health checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    Draining,
}

impl ReadinessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Draining => "draining",
        }
    }
}

/// Ready/draining switch with idempotent transitions.
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct ReadinessController {
    ready: Arc<AtomicBool>,
    drain_grace: Duration,
}

impl Default for ReadinessController {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_GRACE)
    }
}

impl ReadinessController {
    pub fn new(drain_grace: Duration) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            drain_grace,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ReadinessState {
        if self.is_ready() {
            ReadinessState::Ready
        } else {
            ReadinessState::Draining
        }
    }

    pub fn drain_grace(&self) -> Duration {
        self.drain_grace
    }

    /// Moves to draining and holds the caller for the grace interval so load
    /// balancers observe the change. Returns `false` without logging or
    /// waiting when the controller was already draining.
    pub async fn drain(&self) -> bool {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!(
            grace_ms = u64::try_from(self.drain_grace.as_millis()).unwrap_or(u64::MAX),
            "server marked as not ready"
        );
        tokio::time::sleep(self.drain_grace).await;
        true
    }

    /// Returns `false`, without logging, when the controller was already ready.
    pub fn undrain(&self) -> bool {
        if self.ready.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("server marked as ready");
        true
    }

    /// Immediate drain without the grace wait, used on the fatal fault path.
    pub fn mark_not_ready(&self) -> bool {
        let was_ready = self.ready.swap(false, Ordering::SeqCst);
        if was_ready {
            warn!("server marked as not ready after fatal engine fault");
        }
        was_ready
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn install(&self) -> tracing::subscriber::DefaultGuard {
            let logs = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || logs.clone())
                .with_ansi(false)
                .without_time()
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn count(&self, message: &str) -> usize {
            let buffer = self.0.lock().expect("log buffer");
            String::from_utf8_lossy(&buffer).matches(message).count()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("log buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unit_controller_starts_ready() {
        let readiness = ReadinessController::new(Duration::from_secs(1));
        assert!(readiness.is_ready());
        assert_eq!(readiness.state(), ReadinessState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_consecutive_drains_wait_only_once() {
        let grace = Duration::from_secs(5);
        let readiness = ReadinessController::new(grace);

        let started = Instant::now();
        assert!(readiness.drain().await);
        assert!(started.elapsed() >= grace);
        assert_eq!(readiness.state(), ReadinessState::Draining);

        let started = Instant::now();
        assert!(!readiness.drain().await);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!readiness.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_undrain_after_drain_flips_state_once() {
        let readiness = ReadinessController::new(Duration::from_millis(250));
        readiness.drain().await;

        assert!(readiness.undrain());
        assert!(readiness.is_ready());
        assert!(!readiness.undrain());
        assert!(readiness.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_repeated_transitions_log_once_each() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let readiness = ReadinessController::new(Duration::from_secs(2));

        readiness.drain().await;
        readiness.drain().await;
        assert_eq!(logs.count("server marked as not ready"), 1);

        readiness.undrain();
        readiness.undrain();
        assert_eq!(logs.count("server marked as ready"), 1);
    }

    #[test]
    fn regression_undrain_when_ready_is_noop() {
        let readiness = ReadinessController::new(Duration::from_secs(1));
        assert!(!readiness.undrain());
        assert_eq!(readiness.state(), ReadinessState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn regression_drain_after_fault_mark_does_not_wait() {
        let readiness = ReadinessController::new(Duration::from_secs(30));
        assert!(readiness.mark_not_ready());
        assert!(!readiness.mark_not_ready());

        let started = Instant::now();
        assert!(!readiness.drain().await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn unit_clones_share_the_flag() {
        let readiness = ReadinessController::new(Duration::from_secs(1));
        let observer = readiness.clone();
        readiness.mark_not_ready();
        assert_eq!(observer.state(), ReadinessState::Draining);
        assert_eq!(observer.state().as_str(), "draining");
    }
}
