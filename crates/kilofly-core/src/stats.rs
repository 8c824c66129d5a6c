use std::sync::Arc;

use parking_lot::RwLock;

/// Per-count diagnostics of the listener and fetcher
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub signals_received: u64,
    pub fetches_issued: u64,
    pub fetches_applied: u64,
    pub fetches_failed: u64,
    /// Responses that landed after the identity changed
    pub fetches_discarded: u64,
    /// Responses older than one already applied
    pub fetches_superseded: u64,
    pub subscribe_attempts: u64,
    pub subscribe_failures: u64,
    pub streams_lost: u64,
}

/// Thread-safe wrapper for listener stats
#[derive(Debug, Clone, Default)]
pub struct SharedListenerStats {
    inner: Arc<RwLock<ListenerStats>>,
}

impl SharedListenerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, update: impl FnOnce(&mut ListenerStats)) {
        update(&mut self.inner.write());
    }

    pub fn snapshot(&self) -> ListenerStats {
        self.inner.read().clone()
    }
}
