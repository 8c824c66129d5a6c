//! Contract of the hosted backend: point-in-time aggregate counts plus a
//! change feed of row-level mutations.

pub mod memory;
pub mod query;

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CoreError;

pub use memory::InMemoryBackend;
pub use query::{ChangeFilter, Clause, CountQuery, Row};

pub type BackendFuture<'a, T> = BoxFuture<'a, Result<T, CoreError>>;

pub trait ChangeFeedBackend: Send + Sync + 'static {
    /// Count rows (or distinct values) matching the query
    fn aggregate_count<'a>(&'a self, query: &'a CountQuery) -> BackendFuture<'a, u64>;

    /// Open a change stream for a table. Resolves once the backend has
    /// acknowledged the subscription.
    fn subscribe<'a>(&'a self, filter: &'a ChangeFilter) -> BackendFuture<'a, Subscription>;

    /// Release a subscription. Must be safe to call more than once.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// "Something changed in this table". The row, when present, is whatever the
/// backend chose to attach and is never used to derive a count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub table: String,
    pub op: ChangeOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<Row>,
}

/// An acknowledged subscription. The stream ends when the backend drops it.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub signals: mpsc::UnboundedReceiver<ChangeSignal>,
}

/// Releases a subscription handle when dropped, whichever way the owning
/// task exits.
pub(crate) struct SubscriptionGuard<B: ChangeFeedBackend> {
    backend: Arc<B>,
    handle: SubscriptionHandle,
}

impl<B: ChangeFeedBackend> SubscriptionGuard<B> {
    pub(crate) fn new(backend: Arc<B>, handle: SubscriptionHandle) -> Self {
        Self { backend, handle }
    }
}

impl<B: ChangeFeedBackend> Drop for SubscriptionGuard<B> {
    fn drop(&mut self) {
        tracing::debug!(handle = %self.handle, "releasing subscription");
        self.backend.unsubscribe(self.handle);
    }
}
