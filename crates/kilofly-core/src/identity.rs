use tokio::sync::watch;

use crate::models::UserId;

/// The signed-in user, with change notification. Counts never read this
/// ambiently: the runtime observes it and passes the identity explicitly.
#[derive(Debug)]
pub struct IdentityProvider {
    tx: watch::Sender<Option<UserId>>,
}

impl IdentityProvider {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn sign_in(&self, user: UserId) {
        tracing::info!(%user, "identity resolved");
        self.tx.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        tracing::info!("identity cleared");
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

impl Default for IdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}
