use std::sync::Arc;

use super::store::CountStore;
use crate::backend::ChangeFeedBackend;
use crate::config::CoreConfig;

/// Issues full re-fetches of a count. Fetches are fire-and-forget tasks; the
/// store decides whether a result still applies when it lands.
pub(crate) struct CountFetcher<B: ChangeFeedBackend> {
    backend: Arc<B>,
    store: Arc<CountStore>,
    config: Arc<CoreConfig>,
}

impl<B: ChangeFeedBackend> Clone for CountFetcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: ChangeFeedBackend> CountFetcher<B> {
    pub(crate) fn new(backend: Arc<B>, store: Arc<CountStore>, config: Arc<CoreConfig>) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Spawn a fetch for the given identity generation. Returns false when
    /// the generation is no longer current or no identity is bound.
    pub(crate) fn refresh(&self, generation: u64) -> bool {
        let Some(ticket) = self.store.begin_fetch(generation) else {
            return false;
        };

        let query = self.store.kind().count_query(&ticket.user, &self.config);
        let backend = self.backend.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = backend.aggregate_count(&query).await;
            store.complete_fetch(ticket, result);
        });
        true
    }
}
