//! Cancellation tokens for the deadline group.
//!
//! A one-shot "done" observable plus a terminal reason once signalled,
//! built from an atomic bool and a `tokio::sync::Notify`, with a carried
//! [`CancelReason`] and a parent/child relationship so a
//! [`Group`](crate::group::Group) can derive its own internal token from
//! the one a caller supplies.
//!
//! # Example
//!
//! ```
//! use deadline_group::cancellation::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let token = CancellationToken::new();
//!     let child = token.child_token();
//!
//!     token.cancel("shutting down");
//!     child.cancelled().await;
//!     assert!(child.is_cancelled());
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::CancelReason;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
}

/// A one-shot, cloneable cancellation signal with a carried reason.
///
/// Cloning a token shares the same underlying state: cancelling any clone
/// cancels all of them. A [`child_token`](Self::child_token) is a distinct
/// token that is cancelled automatically whenever its parent is, but can
/// also be cancelled independently without affecting the parent.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// The reason the token was cancelled, if it has been.
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.lock().clone()
    }

    /// Request cancellation, carrying `reason` as the terminal error.
    ///
    /// Idempotent: only the first call's reason is kept. Waiters already
    /// parked in [`cancelled`](Self::cancelled) are woken; later callers
    /// observe cancellation immediately without waiting.
    pub fn cancel(&self, reason: impl Into<CancelReason>) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            *self.inner.reason.lock() = Some(reason.into());
            self.inner.notify.notify_waiters();
        }
    }

    /// Wait asynchronously until the token is cancelled.
    ///
    /// Returns immediately if it already is.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Derive a child token.
    ///
    /// The child is cancelled with the parent's reason whenever the parent
    /// is cancelled, but the child can also be cancelled on its own
    /// (for example, to stop a [`Group`](crate::group::Group)'s monitor
    /// once draining completes) without affecting the parent or any
    /// sibling.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        if self.is_cancelled() {
            child.cancel(self.reason().unwrap_or_default());
            return child;
        }
        let parent = self.clone();
        let forwarded = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            forwarded.cancel(parent.reason().unwrap_or_default());
        });
        child
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
