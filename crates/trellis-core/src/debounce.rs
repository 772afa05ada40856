//! Trailing-edge debouncer.
//!
//! Coalesces bursts of triggers into one action: the action runs once the
//! window has passed without a new trigger. A trigger that arrives while the
//! action is running schedules exactly one more run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct Debouncer {
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl Debouncer {
    /// Spawn the debounce loop on the current runtime.
    pub fn spawn<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task_notify = notify.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = task_notify.notified() => {}
                }
                loop {
                    tokio::select! {
                        _ = task_cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => break,
                        _ = task_notify.notified() => continue,
                    }
                }
                action().await;
            }
        });

        Self { notify, cancel }
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}
