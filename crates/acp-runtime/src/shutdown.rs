// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide shutdown signalling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable token used to stop the long-running loops (socket listener,
/// poll reconciler).
///
/// All clones share state; signalling one makes every clone observe
/// `is_shutdown() == true`. In-flight stages are not drained — at-most-once
/// semantics come from the backend plus the in-flight set, not from orderly
/// shutdown.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    /// A token that has not been signalled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Completes when the token is signalled; immediately if it already was.
    pub async fn wait(&self) {
        if self.is_shutdown() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_shutdown() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}
