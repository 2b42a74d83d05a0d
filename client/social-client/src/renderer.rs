/// Renderer-facing glue: key subscriptions and the modal scroll lock
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use query_cache::QueryState;

use crate::cache::QueryData;
use crate::keys::QueryKey;

/// Live view of one cached key
pub struct QuerySubscription {
    key: QueryKey,
    rx: watch::Receiver<QueryState<QueryData>>,
}

impl QuerySubscription {
    pub(crate) fn new(key: QueryKey, rx: watch::Receiver<QueryState<QueryData>>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest state, marking it seen
    pub fn current(&mut self) -> QueryState<QueryData> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<QueryState<QueryData>> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }
}

/// Reference-counted scroll lock. The page stays locked while any modal
/// holds a guard.
#[derive(Clone, Default)]
pub struct ModalLock {
    open: Arc<AtomicUsize>,
}

impl ModalLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> ModalGuard {
        if self.open.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!("Scroll locked");
        }
        ModalGuard {
            open: Arc::clone(&self.open),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.open_count() > 0
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[must_use = "the lock is released when the guard is dropped"]
pub struct ModalGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ModalGuard {
    fn drop(&mut self) {
        if self.open.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!("Scroll unlocked");
        }
    }
}
