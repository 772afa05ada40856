//! Process shutdown coordination.
//!
//! Components that own background work (listeners, discovery watch loops,
//! lease trackers) observe [`Shutdown::token`] and may register a hook that
//! runs when [`Shutdown::run`] is called. Hooks run last-registered first.

use crate::error::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    hooks: Arc<Mutex<Vec<(String, Hook)>>>,
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled at the start of [`Shutdown::run`].
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Register a named hook.
    pub fn on_shutdown<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: Hook = Box::new(move || Box::pin(hook()));
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name.into(), hook));
    }

    /// Cancel the token, then run every registered hook in reverse order.
    /// Hooks still pending when `timeout` elapses are abandoned.
    pub async fn run(&self, timeout: Duration) {
        info!("shutdown started");
        self.token.cancel();

        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let run_all = async {
            for (name, hook) in hooks.into_iter().rev() {
                if let Err(e) = hook().await {
                    error!(hook = %name, error = %e, "shutdown hook failed");
                }
            }
        };
        if tokio::time::timeout(timeout, run_all).await.is_err() {
            warn!(timeout_ms = timeout.as_millis() as u64, "shutdown timed out");
            return;
        }
        info!("shutdown completed");
    }
}

/// Terminate the process immediately. Used when continuing would leave the
/// cluster with a stale view of this process.
pub fn abort_process(reason: &str) -> ! {
    error!(reason, "aborting process");
    std::process::abort()
}
