//! One-shot session timers.
//!
//! Each armed timer is a detached tokio task that sleeps and then runs its
//! callback. Cancelling aborts the task. Cancel is safe at any point,
//! including after the timer has already fired.
//!
//! Timers never decide anything on their own. The callbacks they run go
//! back through the store, which re-checks session state under the session
//! lock before acting.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Cancellable reference to an armed timer.
#[derive(Debug)]
pub struct ExpiryHandle {
    abort: AbortHandle,
}

impl ExpiryHandle {
    /// Cancel the timer. No-op if it already fired or was cancelled.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the underlying task has completed (fired or aborted).
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Arms one-shot timers on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryScheduler;

impl ExpiryScheduler {
    /// Run `callback` once after `after`, unless cancelled first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, after: Duration, callback: F) -> ExpiryHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.arm_async(after, async move { callback() })
    }

    /// Like [`arm`](Self::arm), for callbacks that need to await.
    pub fn arm_async<Fut>(&self, after: Duration, callback: Fut) -> ExpiryHandle
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            callback.await;
        });
        ExpiryHandle {
            abort: task.abort_handle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_duration() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = ExpiryScheduler.arm(Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = ExpiryScheduler.arm(Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_harmless() {
        let handle = ExpiryScheduler.arm(Duration::from_millis(10), || {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
        handle.cancel();
        assert!(handle.is_finished());
    }
}
