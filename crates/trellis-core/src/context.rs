//! Request-scoped context.
//!
//! An [`RpcContext`] carries call metadata (trace id, operator, caller,
//! locale) plus an optional deadline and a cancellation token. Contexts are
//! cheap to clone; deriving a child with a tighter deadline never affects
//! the parent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_OPERATOR: &str = "system";
const DEFAULT_CALLER: &str = "unknown";

/// Metadata propagated with every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub trace_id: i64,
    pub operator: String,
    pub caller: String,
    pub locale: String,
}

impl Metadata {
    /// Fill empty fields: a fresh trace id, `system` operator and the
    /// given caller name (or `unknown`).
    pub fn fill_defaults(&mut self, caller: Option<&str>) {
        if self.trace_id == 0 {
            self.trace_id = new_trace_id();
        }
        if self.caller.is_empty() {
            self.caller = caller
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CALLER)
                .to_string();
        }
        if self.operator.is_empty() {
            self.operator = DEFAULT_OPERATOR.to_string();
        }
    }
}

/// Generate a positive, non-zero trace id.
pub fn new_trace_id() -> i64 {
    ((rand::random::<u64>() >> 1) as i64).max(1)
}

#[derive(Debug, Clone)]
pub struct RpcContext {
    metadata: Arc<Metadata>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl Default for RpcContext {
    fn default() -> Self {
        Self::background()
    }
}

impl RpcContext {
    /// A root context with default metadata and no deadline.
    pub fn background() -> Self {
        Self::with_metadata(Metadata::default(), None)
    }

    /// A root context carrying the given metadata; empty fields are filled.
    pub fn with_metadata(mut metadata: Metadata, caller: Option<&str>) -> Self {
        metadata.fill_defaults(caller);
        Self {
            metadata: Arc::new(metadata),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child bounded by `timeout`. The child keeps the earlier of
    /// its parent's deadline and `now + timeout`, and is cancelled when the
    /// parent is.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            metadata: self.metadata.clone(),
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// Derive a child that can be cancelled independently of its parent.
    pub fn child(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn trace_id(&self) -> i64 {
        self.metadata.trace_id
    }

    pub fn operator(&self) -> &str {
        &self.metadata.operator
    }

    pub fn caller(&self) -> &str {
        &self.metadata.caller
    }

    pub fn locale(&self) -> &str {
        &self.metadata.locale
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled()
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}
