//! In-process backend holding JSON rows per table.
//!
//! Backs the CLI simulator and the test suite. Mutations fan out a
//! `ChangeSignal` to every subscriber of the table; failures and latency can
//! be injected per call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    BackendFuture, ChangeFeedBackend, ChangeFilter, ChangeOp, ChangeSignal, CountQuery, Row,
    Subscription, SubscriptionHandle,
};
use crate::constants::columns;
use crate::error::CoreError;

pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    next_handle: AtomicU64,
}

struct Subscriber {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeSignal>,
}

struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    /// When false every subscriber of a table sees every change
    precise_filters: bool,
    pending_count_failures: u32,
    pending_subscribe_failures: u32,
    count_delays: VecDeque<Duration>,
    count_calls: u64,
    unsubscribe_calls: u64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                tables: HashMap::new(),
                subscribers: HashMap::new(),
                precise_filters: true,
                pending_count_failures: 0,
                pending_subscribe_failures: 0,
                count_delays: VecDeque::new(),
                count_calls: 0,
                unsubscribe_calls: 0,
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Deliver every change of a table to all of its subscribers, ignoring
    /// their filters.
    pub fn with_imprecise_filters(self) -> Self {
        self.state.lock().precise_filters = false;
        self
    }

    // ===== Row mutations =====

    /// Insert a row, assigning an `id` when it has none. Returns the id.
    pub fn insert(&self, table: &str, row: Value) -> Result<String, CoreError> {
        let mut row = into_row(row)?;
        let id = match row.get(columns::ID).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                row.insert(columns::ID.to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut state = self.state.lock();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        state.notify(table, ChangeOp::Insert, None, Some(&row));
        Ok(id)
    }

    /// Merge `patch` into the row with the given id. Returns false when absent.
    pub fn update(&self, table: &str, id: &str, patch: Value) -> Result<bool, CoreError> {
        let patch = into_row(patch)?;

        let mut state = self.state.lock();
        let Some(existing) = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
        else {
            return Ok(false);
        };

        let old = existing.clone();
        for (column, value) in patch {
            existing.insert(column, value);
        }
        let new = existing.clone();
        state.notify(table, ChangeOp::Update, Some(&old), Some(&new));
        Ok(true)
    }

    pub fn delete(&self, table: &str, id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(rows) = state.tables.get_mut(table) else {
            return false;
        };
        let Some(pos) = rows.iter().position(|row| row_id(row) == Some(id)) else {
            return false;
        };

        let old = rows.remove(pos);
        state.notify(table, ChangeOp::Delete, Some(&old), None);
        true
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    // ===== Fault injection =====

    pub fn fail_next_counts(&self, n: u32) {
        self.state.lock().pending_count_failures = n;
    }

    pub fn fail_next_subscribes(&self, n: u32) {
        self.state.lock().pending_subscribe_failures = n;
    }

    /// Delay the response of the next aggregate count. The count itself is
    /// taken when the call is issued, so a delayed response carries an older
    /// value than calls issued after it.
    pub fn delay_next_count(&self, delay: Duration) {
        self.state.lock().count_delays.push_back(delay);
    }

    /// Close every open change stream, as a dropped connection would
    pub fn drop_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    // ===== Introspection =====

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    pub fn count_calls(&self) -> u64 {
        self.state.lock().count_calls
    }

    pub fn unsubscribe_calls(&self) -> u64 {
        self.state.lock().unsubscribe_calls
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn notify(&mut self, table: &str, op: ChangeOp, old: Option<&Row>, new: Option<&Row>) {
        let precise = self.precise_filters;
        let payload = new.or(old).cloned();

        self.subscribers.retain(|handle, subscriber| {
            if subscriber.filter.table != table {
                return true;
            }
            let relevant = !precise
                || old.is_some_and(|row| subscriber.filter.accepts(row))
                || new.is_some_and(|row| subscriber.filter.accepts(row));
            if !relevant {
                return true;
            }

            let signal = ChangeSignal {
                table: table.to_string(),
                op,
                row: payload.clone(),
            };
            let delivered = subscriber.tx.send(signal).is_ok();
            if !delivered {
                tracing::debug!(%handle, "dropping subscriber with closed stream");
            }
            delivered
        });
    }
}

impl ChangeFeedBackend for InMemoryBackend {
    fn aggregate_count<'a>(&'a self, query: &'a CountQuery) -> BackendFuture<'a, u64> {
        Box::pin(async move {
            let (result, delay) = {
                let mut state = self.state.lock();
                state.count_calls += 1;
                let delay = state.count_delays.pop_front();
                if state.pending_count_failures > 0 {
                    state.pending_count_failures -= 1;
                    (
                        Err(CoreError::backend_query(&query.table, "injected failure")),
                        delay,
                    )
                } else {
                    let count = state
                        .tables
                        .get(&query.table)
                        .map(|rows| query.evaluate(rows.iter()))
                        .unwrap_or(0);
                    (Ok(count), delay)
                }
            };

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn subscribe<'a>(&'a self, filter: &'a ChangeFilter) -> BackendFuture<'a, Subscription> {
        Box::pin(async move {
            let mut state = self.state.lock();
            if state.pending_subscribe_failures > 0 {
                state.pending_subscribe_failures -= 1;
                return Err(CoreError::subscription(&filter.table, "injected failure"));
            }

            let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
            let (tx, signals) = mpsc::unbounded_channel();
            state.subscribers.insert(
                handle,
                Subscriber {
                    filter: filter.clone(),
                    tx,
                },
            );
            Ok(Subscription { handle, signals })
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut state = self.state.lock();
        state.unsubscribe_calls += 1;
        state.subscribers.remove(&handle);
    }
}

fn into_row(value: Value) -> Result<Row, CoreError> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(CoreError::Parse {
            message: format!("row must be a JSON object, got {}", other),
        }),
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get(columns::ID).and_then(Value::as_str)
}
