use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::fetcher::CountFetcher;
use super::store::CountStore;
use crate::backend::{ChangeFeedBackend, ChangeFilter, Subscription, SubscriptionGuard};
use crate::config::CoreConfig;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// Everything one listener task needs, bound to a single identity generation
pub(crate) struct ListenerContext<B: ChangeFeedBackend> {
    pub backend: Arc<B>,
    pub fetcher: CountFetcher<B>,
    pub store: Arc<CountStore>,
    pub filter: ChangeFilter,
    pub generation: u64,
    pub config: Arc<CoreConfig>,
}

/// A running listener. Stopping it releases the backend subscription before
/// `stop` returns.
pub(crate) struct ListenerTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ListenerTask {
    pub(crate) fn spawn<B: ChangeFeedBackend>(ctx: ListenerContext<B>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_listener(ctx, shutdown_rx));
        Self { shutdown, handle }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!("change listener panicked: {}", e);
            }
        }
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

async fn run_listener<B: ChangeFeedBackend>(
    ctx: ListenerContext<B>,
    mut shutdown: watch::Receiver<bool>,
) {
    let ListenerContext {
        backend,
        fetcher,
        store,
        filter,
        generation,
        config,
    } = ctx;
    let kind = store.kind().clone();

    // Mount fetch: show a value even while the subscription is being set up
    fetcher.refresh(generation);

    let mut attempt: u32 = 0;
    'listen: loop {
        if *shutdown.borrow() {
            break;
        }

        store.set_listener_state(ListenerState::Subscribing);
        store.stats_handle().record(|s| s.subscribe_attempts += 1);

        // Teardown must not wait for a pending acknowledgement
        let subscribed = tokio::select! {
            _ = shutdown.changed() => break 'listen,
            result = tokio::time::timeout(config.subscribe_timeout(), backend.subscribe(&filter)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(CoreError::subscription(
                        &filter.table,
                        "timed out waiting for acknowledgement",
                    )),
                }
            }
        };

        match subscribed {
            Ok(Subscription {
                handle,
                mut signals,
            }) => {
                let _guard = SubscriptionGuard::new(backend.clone(), handle);
                if *shutdown.borrow() {
                    break 'listen;
                }

                attempt = 0;
                store.set_listener_state(ListenerState::Subscribed);
                tracing::info!(%kind, %handle, "subscribed to change feed");

                // Catch changes made between the mount fetch and the acknowledgement
                fetcher.refresh(generation);

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break 'listen,
                        signal = signals.recv() => match signal {
                            Some(signal) => {
                                store.stats_handle().record(|s| s.signals_received += 1);
                                tracing::trace!(%kind, op = ?signal.op, "change signal");
                                fetcher.refresh(generation);
                            }
                            None => {
                                store.stats_handle().record(|s| s.streams_lost += 1);
                                tracing::warn!(%kind, %handle, "change stream closed by backend");
                                store.mark_stale(generation);
                                break;
                            }
                        },
                    }
                }
            }
            Err(error) => {
                store.stats_handle().record(|s| s.subscribe_failures += 1);
                tracing::warn!(%kind, %error, attempt, "subscription failed");
                store.mark_stale(generation);
            }
        }

        attempt += 1;
        if config.resubscribe.is_exhausted(attempt) {
            tracing::error!(
                %kind,
                retries = attempt - 1,
                "giving up on change feed, showing last known value"
            );
            break;
        }

        store.set_listener_state(ListenerState::Unsubscribed);
        let delay = config.resubscribe.delay_for(attempt);
        tracing::debug!(%kind, attempt, delay_ms = delay.as_millis() as u64, "resubscribing");
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    store.set_listener_state(ListenerState::Unsubscribed);
}
