use std::sync::Arc;

use tokio::sync::watch;

use super::fetcher::CountFetcher;
use super::listener::{ListenerContext, ListenerState, ListenerTask};
use super::store::CountStore;
use crate::backend::ChangeFeedBackend;
use crate::config::CoreConfig;
use crate::events::EventSink;
use crate::models::{CountKind, CountSnapshot, UserId};
use crate::stats::ListenerStats;

/// One live count bound to an explicit identity.
///
/// While an identity is set, a listener task keeps exactly one backend
/// subscription open and re-fetches the count on every change signal.
/// Without an identity the count reads 0 and no subscription is held.
pub struct LiveCount<B: ChangeFeedBackend> {
    backend: Arc<B>,
    config: Arc<CoreConfig>,
    store: Arc<CountStore>,
    listener: Option<ListenerTask>,
}

impl<B: ChangeFeedBackend> LiveCount<B> {
    pub fn new(
        kind: CountKind,
        backend: Arc<B>,
        config: Arc<CoreConfig>,
        events: EventSink,
    ) -> Self {
        let store = CountStore::new(kind, &config, events);
        Self {
            backend,
            config,
            store,
            listener: None,
        }
    }

    /// Create and immediately bind to `user`
    pub async fn mount(
        kind: CountKind,
        backend: Arc<B>,
        config: Arc<CoreConfig>,
        events: EventSink,
        user: Option<UserId>,
    ) -> Self {
        let mut count = Self::new(kind, backend, config, events);
        count.set_identity(user).await;
        count
    }

    // ===== Getters =====

    pub fn kind(&self) -> &CountKind {
        self.store.kind()
    }

    pub fn user(&self) -> Option<UserId> {
        self.store.user()
    }

    pub fn snapshot(&self) -> CountSnapshot {
        self.store.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<CountSnapshot> {
        self.store.watch()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.store.listener_state()
    }

    pub fn watch_listener_state(&self) -> watch::Receiver<ListenerState> {
        self.store.watch_listener_state()
    }

    pub fn stats(&self) -> ListenerStats {
        self.store.stats()
    }

    // ===== Lifecycle =====

    /// Rebind to a new identity. The previous listener is stopped and its
    /// subscription released before a new one is created.
    pub async fn set_identity(&mut self, user: Option<UserId>) {
        if self.store.user() == user {
            // Same scope: only revive a listener that gave up
            if let Some(user) = user {
                if !self.listener_running() {
                    self.stop_listener().await;
                    let generation = self.store.generation();
                    self.start_listener(user, generation);
                }
            }
            return;
        }

        tracing::debug!(kind = %self.kind(), user = ?user, "rebinding live count");
        let generation = self.store.rescope(user.clone());
        self.stop_listener().await;
        if let Some(user) = user {
            self.start_listener(user, generation);
        }
    }

    /// Force a full re-fetch. Returns false when no identity is bound.
    pub fn refresh(&self) -> bool {
        self.fetcher().refresh(self.store.generation())
    }

    /// Drop the identity: count to 0, subscription released
    pub async fn shutdown(&mut self) {
        self.set_identity(None).await;
    }

    fn listener_running(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }

    fn fetcher(&self) -> CountFetcher<B> {
        CountFetcher::new(self.backend.clone(), self.store.clone(), self.config.clone())
    }

    fn start_listener(&mut self, user: UserId, generation: u64) {
        let filter = self.store.kind().change_filter(&user);
        self.listener = Some(ListenerTask::spawn(ListenerContext {
            backend: self.backend.clone(),
            fetcher: self.fetcher(),
            store: self.store.clone(),
            filter,
            generation,
            config: self.config.clone(),
        }));
    }

    async fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }
        self.store.set_listener_state(ListenerState::Unsubscribed);
    }
}

impl<B: ChangeFeedBackend> Drop for LiveCount<B> {
    fn drop(&mut self) {
        // Void fetches still in flight; they hold their own handle on the store
        self.store.rescope(None);
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendFuture, ChangeFilter, CountQuery, InMemoryBackend, Subscription, SubscriptionHandle,
    };
    use crate::events::CoreEvent;
    use crate::models::ConversationId;
    use serde_json::json;
    use std::time::Duration;

    /// Let spawned listener and fetch tasks run to quiescence
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn alice() -> Option<UserId> {
        Some(UserId::from("alice"))
    }

    fn package(user: &str, status: &str) -> serde_json::Value {
        json!({"user_id": user, "status": status})
    }

    fn unread(conversation: &str, from: &str, to: &str) -> serde_json::Value {
        json!({
            "conversation_id": conversation,
            "sender_id": from,
            "recipient_id": to,
            "read": false
        })
    }

    async fn mount(
        kind: CountKind,
        backend: &Arc<InMemoryBackend>,
        config: CoreConfig,
    ) -> LiveCount<InMemoryBackend> {
        LiveCount::mount(
            kind,
            backend.clone(),
            Arc::new(config),
            EventSink::disabled(),
            alice(),
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_fetches_and_subscribes() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        backend.insert("packages", package("alice", "delivered")).unwrap();

        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;

        assert_eq!(count.snapshot().value, 1);
        assert_eq!(count.listener_state(), ListenerState::Subscribed);
        assert_eq!(backend.active_subscriptions(), 1);
        assert!(!count.snapshot().has_new_arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_trigger_full_refetch() {
        let backend = Arc::new(InMemoryBackend::new());
        let count = mount(CountKind::UnreadConversations, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(count.snapshot().value, 0);

        backend.insert("messages", unread("c1", "bob", "alice")).unwrap();
        backend.insert("messages", unread("c1", "bob", "alice")).unwrap();
        let id = backend.insert("messages", unread("c2", "carol", "alice")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 2);

        backend.update("messages", &id, json!({"read": true})).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 1);
        assert!(count.stats().signals_received >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_imprecise_filter_still_counts_authoritatively() {
        let backend = Arc::new(InMemoryBackend::new().with_imprecise_filters());
        let kind = CountKind::UnreadMessages {
            conversation: ConversationId::from("c1"),
        };
        let count = mount(kind, &backend, CoreConfig::default()).await;
        settle().await;

        // Other conversations wake the listener but do not change the count
        backend.insert("messages", unread("c2", "bob", "alice")).unwrap();
        backend.insert("messages", unread("c1", "alice", "bob")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 0);
        assert_eq!(count.stats().signals_received, 2);

        backend.insert("messages", unread("c1", "bob", "alice")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_identity_means_zero_and_no_subscription() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();

        let mut count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(count.snapshot().value, 1);

        count.set_identity(None).await;
        settle().await;
        assert_eq!(count.snapshot(), CountSnapshot::default());
        assert_eq!(count.listener_state(), ListenerState::Unsubscribed);
        assert_eq!(backend.active_subscriptions(), 0);

        // Changes while signed out are ignored
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 0);
        assert!(!count.refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_switch_keeps_one_subscription() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        backend.insert("packages", package("bob", "pending")).unwrap();
        backend.insert("packages", package("bob", "accepted")).unwrap();

        let mut count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(count.snapshot().value, 1);

        count.set_identity(Some(UserId::from("bob"))).await;
        settle().await;
        assert_eq!(count.snapshot().value, 2);
        assert_eq!(backend.active_subscriptions(), 1);
        // A switch starts from the unset sentinel: 1 -> 2 is not an arrival
        assert!(!count.snapshot().has_new_arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_identity_is_a_no_op() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        let calls = backend.count_calls();

        count.set_identity(alice()).await;
        settle().await;
        assert_eq!(backend.count_calls(), calls);
        assert_eq!(backend.active_subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrival_flag_clears_after_3000ms() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        backend.insert("packages", package("alice", "pending")).unwrap();

        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(count.snapshot().value, 2);

        backend.insert("packages", package("alice", "accepted")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 3);
        assert!(count.snapshot().has_new_arrival);

        tokio::time::advance(Duration::from_millis(2999)).await;
        settle().await;
        assert!(count.snapshot().has_new_arrival);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(!count.snapshot().has_new_arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_arrival_restarts_timer() {
        let backend = Arc::new(InMemoryBackend::new());
        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;

        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert!(count.snapshot().has_new_arrival);

        tokio::time::advance(Duration::from_millis(2000)).await;
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;

        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        assert!(count.snapshot().has_new_arrival);

        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        assert!(!count.snapshot().has_new_arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_arrival_without_restart_keeps_first_deadline() {
        let backend = Arc::new(InMemoryBackend::new());
        let config = CoreConfig {
            restart_arrival_timer: false,
            ..CoreConfig::default()
        };
        let count = mount(CountKind::ActivePackages, &backend, config).await;
        settle().await;

        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        tokio::time::advance(Duration::from_millis(2000)).await;
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert!(count.snapshot().has_new_arrival);

        tokio::time::advance(Duration::from_millis(1000)).await;
        settle().await;
        assert!(!count.snapshot().has_new_arrival);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_keeps_last_value() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(count.snapshot().value, 1);

        backend.fail_next_counts(1);
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 1);
        assert!(count.snapshot().stale);
        assert_eq!(count.stats().fetches_failed, 1);

        // Next signal heals it
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 3);
        assert!(!count.snapshot().stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_response_is_superseded() {
        let backend = Arc::new(InMemoryBackend::new());
        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;

        // First fetch sees 1 but answers late; second sees 2 and answers at once
        backend.delay_next_count(Duration::from_millis(500));
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        assert_eq!(count.snapshot().value, 2);

        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(count.snapshot().value, 2);
        assert_eq!(count.stats().fetches_superseded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_fetch_after_teardown_is_a_no_op() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;

        backend.delay_next_count(Duration::from_millis(500));
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;

        count.set_identity(None).await;
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(count.snapshot().value, 0);
        assert_eq!(count.stats().fetches_discarded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_fetch_after_drop_emits_nothing() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        let (events, mut rx) = EventSink::channel();
        let count = LiveCount::mount(
            CountKind::ActivePackages,
            backend.clone(),
            Arc::new(CoreConfig::default()),
            events,
            alice(),
        )
        .await;
        settle().await;
        while rx.try_recv().is_ok() {}

        backend.delay_next_count(Duration::from_millis(500));
        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;
        let calls = backend.count_calls();

        drop(count);
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;

        let late: Vec<CoreEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(late.is_empty(), "unexpected events {:?}", late);
        assert_eq!(backend.count_calls(), calls);
        assert_eq!(backend.active_subscriptions(), 0);
    }

    /// Answers counts but never acknowledges a subscription
    struct StalledBackend;

    impl ChangeFeedBackend for StalledBackend {
        fn aggregate_count<'a>(&'a self, _query: &'a CountQuery) -> BackendFuture<'a, u64> {
            Box::pin(async { Ok(0) })
        }

        fn subscribe<'a>(&'a self, _filter: &'a ChangeFilter) -> BackendFuture<'a, Subscription> {
            Box::pin(futures::future::pending())
        }

        fn unsubscribe(&self, _handle: SubscriptionHandle) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_does_not_wait_for_subscribe_ack() {
        let mut count = LiveCount::mount(
            CountKind::ActivePackages,
            Arc::new(StalledBackend),
            Arc::new(CoreConfig::default()),
            EventSink::disabled(),
            alice(),
        )
        .await;
        let mut state = count.watch_listener_state();
        state
            .wait_for(|s| *s == ListenerState::Subscribing)
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        count.set_identity(Some(UserId::from("bob"))).await;
        assert!(started.elapsed() < Duration::from_millis(1));
        assert_eq!(count.user(), Some(UserId::from("bob")));

        count.set_identity(None).await;
        assert!(started.elapsed() < Duration::from_millis(1));
        assert_eq!(count.listener_state(), ListenerState::Unsubscribed);
        assert_eq!(count.snapshot().value, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribes_after_stream_loss() {
        let backend = Arc::new(InMemoryBackend::new());
        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;

        backend.drop_subscriptions();
        settle().await;
        assert!(count.snapshot().stale);
        assert_eq!(count.listener_state(), ListenerState::Unsubscribed);

        // Changes made while disconnected are picked up by the post-ack fetch
        backend.insert("packages", package("alice", "pending")).unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(count.listener_state(), ListenerState::Subscribed);
        assert_eq!(count.snapshot().value, 1);
        assert!(!count.snapshot().stale);
        assert_eq!(backend.active_subscriptions(), 1);
        assert_eq!(count.stats().streams_lost, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_next_subscribes(10);
        let mut config = CoreConfig::default();
        config.resubscribe.max_attempts = Some(2);

        let mut count = mount(CountKind::ActivePackages, &backend, config).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(count.listener_state(), ListenerState::Unsubscribed);
        assert_eq!(count.stats().subscribe_attempts, 3);
        assert!(count.snapshot().stale);
        assert_eq!(backend.active_subscriptions(), 0);

        // Re-binding the same identity revives the listener
        backend.fail_next_subscribes(0);
        count.set_identity(alice()).await;
        settle().await;
        assert_eq!(count.listener_state(), ListenerState::Subscribed);
        assert!(!count.snapshot().stale);
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_count_and_arrival_events() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert("packages", package("alice", "pending")).unwrap();
        let (events, mut rx) = EventSink::channel();
        let _count = LiveCount::mount(
            CountKind::ActivePackages,
            backend.clone(),
            Arc::new(CoreConfig::default()),
            events,
            alice(),
        )
        .await;
        settle().await;

        backend.insert("packages", package("alice", "pending")).unwrap();
        settle().await;

        let received: Vec<CoreEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let values: Vec<u64> = received
            .iter()
            .filter_map(|event| match event {
                CoreEvent::CountChanged { value, .. } => Some(*value),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(
            received
                .iter()
                .filter(|event| matches!(event, CoreEvent::NewArrival { value: 2, .. }))
                .count(),
            1
        );
        assert!(received.iter().any(|event| matches!(event, CoreEvent::Toast(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_subscription() {
        let backend = Arc::new(InMemoryBackend::new());
        let count = mount(CountKind::ActivePackages, &backend, CoreConfig::default()).await;
        settle().await;
        assert_eq!(backend.active_subscriptions(), 1);

        drop(count);
        settle().await;
        assert_eq!(backend.active_subscriptions(), 0);
    }
}
