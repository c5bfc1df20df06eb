//! Idle-timeout timer.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Single deferred action, rescheduled on every rearm.
///
/// Each rearm bumps an epoch and replaces the pending task; the action
/// receives the epoch it was armed with so it can confirm, under its own
/// lock, that nothing rearmed the timer in the meantime.
#[derive(Default)]
pub(crate) struct IdleTimer {
    epoch: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IdleTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending action and schedule `on_idle` after `window`.
    pub(crate) fn rearm<F, Fut>(&self, window: Duration, on_idle: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = self.task.lock().unwrap();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.epoch);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if current.load(Ordering::SeqCst) == epoch {
                on_idle(epoch).await;
            }
        });

        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending action, if any.
    pub(crate) fn cancel(&self) {
        let mut task = self.task.lock().unwrap();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = task.take() {
            previous.abort();
        }
    }

    /// Whether `epoch` is still the latest arming.
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

    fn arm(timer: &IdleTimer, fired: &Arc<AtomicUsize>) {
        let fired = Arc::clone(fired);
        timer.rearm(WINDOW, move |_| async move {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_window() {
        let timer = IdleTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        arm(&timer, &fired);

        advance(WINDOW - Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_measures_from_last_request() {
        let timer = IdleTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        arm(&timer, &fired);

        advance(Duration::from_secs(60 * 60)).await;
        arm(&timer, &fired);

        // Past the first deadline, before the second
        advance(Duration::from_secs(60 * 60 + 1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let timer = IdleTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        arm(&timer, &fired);
        timer.cancel();

        advance(WINDOW * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_is_current_tracks_latest_arming() {
        let timer = IdleTimer::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_in_action = Arc::clone(&seen);
        timer.rearm(Duration::ZERO, move |epoch| async move {
            *seen_in_action.lock().unwrap() = Some(epoch);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let epoch = seen.lock().unwrap().unwrap();
        assert!(timer.is_current(epoch));
        timer.cancel();
        assert!(!timer.is_current(epoch));
    }
}
