use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::backend::ChangeFeedBackend;
use crate::config::CoreConfig;
use crate::events::{CoreEvent, EventSink};
use crate::identity::IdentityProvider;
use crate::live::LiveCount;
use crate::models::{ConversationId, CountKind, CountSnapshot, UserId};
use crate::trust::{TrustNotifier, TrustTransition};

/// Owns every live count of a session and keeps them bound to the identity
/// published by an [`IdentityProvider`].
pub struct CoreRuntime<B: ChangeFeedBackend> {
    backend: Arc<B>,
    config: Arc<CoreConfig>,
    events: EventSink,
    identity: watch::Receiver<Option<UserId>>,
    user: Option<UserId>,
    active_packages: LiveCount<B>,
    unread_conversations: LiveCount<B>,
    /// Unread-message counts of the conversations currently on screen
    conversations: HashMap<ConversationId, LiveCount<B>>,
    trust: TrustNotifier,
}

impl<B: ChangeFeedBackend> CoreRuntime<B> {
    pub fn new(
        backend: Arc<B>,
        config: CoreConfig,
        identity: &IdentityProvider,
        events: EventSink,
    ) -> Self {
        let config = Arc::new(config);
        let trust = TrustNotifier::new(config.trust_point_gain_threshold);
        let active_packages = LiveCount::new(
            CountKind::ActivePackages,
            backend.clone(),
            config.clone(),
            events.clone(),
        );
        let unread_conversations = LiveCount::new(
            CountKind::UnreadConversations,
            backend.clone(),
            config.clone(),
            events.clone(),
        );

        let identity = identity.subscribe();

        Self {
            backend,
            config,
            events,
            identity,
            user: None,
            active_packages,
            unread_conversations,
            conversations: HashMap::new(),
            trust,
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn active_packages(&self) -> &LiveCount<B> {
        &self.active_packages
    }

    pub fn unread_conversations(&self) -> &LiveCount<B> {
        &self.unread_conversations
    }

    pub fn conversation(&self, conversation: &ConversationId) -> Option<&LiveCount<B>> {
        self.conversations.get(conversation)
    }

    pub fn open_conversations(&self) -> impl Iterator<Item = &ConversationId> {
        self.conversations.keys()
    }

    // ===== Identity =====

    /// Apply the provider's current identity to every count
    pub async fn sync_identity(&mut self) {
        let user = self.identity.borrow_and_update().clone();
        self.apply_identity(user).await;
    }

    /// Wait for the next identity change and apply it. Returns false once the
    /// provider is gone.
    pub async fn identity_changed(&mut self) -> bool {
        if self.identity.changed().await.is_err() {
            return false;
        }
        self.sync_identity().await;
        true
    }

    async fn apply_identity(&mut self, user: Option<UserId>) {
        if self.user == user {
            return;
        }
        tracing::info!(user = ?user, "binding live counts");

        self.trust.reset();
        self.active_packages.set_identity(user.clone()).await;
        self.unread_conversations.set_identity(user.clone()).await;
        for count in self.conversations.values_mut() {
            count.set_identity(user.clone()).await;
        }
        self.user = user;
    }

    // ===== Conversations =====

    /// Start tracking unread messages of a conversation. Opening one that is
    /// already tracked reuses its listener.
    pub async fn open_conversation(
        &mut self,
        conversation: ConversationId,
    ) -> watch::Receiver<CountSnapshot> {
        if let Some(count) = self.conversations.get(&conversation) {
            return count.watch();
        }

        let count = LiveCount::mount(
            CountKind::UnreadMessages {
                conversation: conversation.clone(),
            },
            self.backend.clone(),
            self.config.clone(),
            self.events.clone(),
            self.user.clone(),
        )
        .await;
        let rx = count.watch();
        self.conversations.insert(conversation, count);
        rx
    }

    pub async fn close_conversation(&mut self, conversation: &ConversationId) -> bool {
        match self.conversations.remove(conversation) {
            Some(mut count) => {
                count.shutdown().await;
                true
            }
            None => false,
        }
    }

    // ===== Trust =====

    /// Feed a freshly computed trust score. Qualifying transitions are
    /// announced as toasts; nothing is announced while signed out.
    pub fn observe_trust_score(&mut self, score: u32) -> Option<TrustTransition> {
        self.user.as_ref()?;

        let transition = self.trust.observe(score)?;
        if let TrustTransition::LevelUp { from, to, score } = transition {
            tracing::info!(%from, %to, score, "trust level up");
            self.events.emit(CoreEvent::TrustLevelUp { from, to, score });
        }
        self.events.toast(transition.to_toast());
        Some(transition)
    }

    /// Release every subscription
    pub async fn shutdown(&mut self) {
        self.active_packages.shutdown().await;
        self.unread_conversations.shutdown().await;
        for (_, mut count) in self.conversations.drain() {
            count.shutdown().await;
        }
        self.user = None;
    }
}
