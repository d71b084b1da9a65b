//! Per-job mutual exclusion for executions.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// At-most-one-execution guard for a single job id.
///
/// Acquisition is a compare-and-swap on the job's own flag; there is no lock
/// shared between jobs. Releasing wakes every task waiting for the job to go
/// idle.
#[derive(Debug, Default)]
pub(crate) struct RunGuard {
    running: AtomicBool,
    idle: Notify,
}

impl RunGuard {
    /// Claim the job for one execution. Returns `false` if a run is already in flight.
    pub(crate) fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.running.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolve once no execution is in flight.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a release in between is not lost.
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let guard = RunGuard::default();
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        guard.release();
        assert!(guard.try_acquire());
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_free() {
        let guard = RunGuard::default();
        tokio::time::timeout(Duration::from_millis(100), guard.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_wakes_on_release() {
        let guard = Arc::new(RunGuard::default());
        assert!(guard.try_acquire());

        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { guard.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        guard.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_has_single_winner() {
        let guard = Arc::new(RunGuard::default());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = Arc::clone(&guard);
            handles.push(tokio::spawn(async move { guard.try_acquire() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
