use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::listener::ListenerState;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::events::{CoreEvent, EventSink};
use crate::models::{CountKind, CountSnapshot, UserId};
use crate::notifications::Toast;
use crate::stats::{ListenerStats, SharedListenerStats};

/// An arrival is a strict increase over a value that was actually observed.
/// `None` is the unset sentinel of a freshly mounted count.
pub fn is_new_arrival(previous: Option<u64>, current: u64) -> bool {
    previous.is_some_and(|previous| current > previous)
}

/// Permission to apply one fetch result, issued by the store
#[derive(Debug, Clone)]
pub(crate) struct FetchTicket {
    pub generation: u64,
    pub seq: u64,
    pub user: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Applied { changed: bool, arrival: bool },
    Failed,
    /// The identity changed while the fetch was in flight
    Discarded,
    /// A fetch issued later has already been applied
    Superseded,
}

struct CountState {
    user: Option<UserId>,
    /// Bumped on every identity change; tickets of older generations are void
    generation: u64,
    next_seq: u64,
    applied_seq: u64,
    value: u64,
    previous: Option<u64>,
    stale: bool,
    has_new_arrival: bool,
    arrival_epoch: u64,
    arrival_timer: Option<JoinHandle<()>>,
}

/// Count state owned by one view. Snapshots are published on a watch channel.
pub struct CountStore {
    kind: CountKind,
    arrival_flag: Duration,
    restart_arrival_timer: bool,
    state: Mutex<CountState>,
    snapshots: watch::Sender<CountSnapshot>,
    listener_state: watch::Sender<ListenerState>,
    stats: SharedListenerStats,
    events: EventSink,
}

impl CountStore {
    pub(crate) fn new(kind: CountKind, config: &CoreConfig, events: EventSink) -> Arc<Self> {
        let (snapshots, _) = watch::channel(CountSnapshot::default());
        let (listener_state, _) = watch::channel(ListenerState::Unsubscribed);

        Arc::new(Self {
            kind,
            arrival_flag: config.arrival_flag_duration(),
            restart_arrival_timer: config.restart_arrival_timer,
            state: Mutex::new(CountState {
                user: None,
                generation: 0,
                next_seq: 0,
                applied_seq: 0,
                value: 0,
                previous: None,
                stale: false,
                has_new_arrival: false,
                arrival_epoch: 0,
                arrival_timer: None,
            }),
            snapshots,
            listener_state,
            stats: SharedListenerStats::new(),
            events,
        })
    }

    // ===== Getters =====

    pub fn kind(&self) -> &CountKind {
        &self.kind
    }

    pub fn snapshot(&self) -> CountSnapshot {
        *self.snapshots.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<CountSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn listener_state(&self) -> ListenerState {
        *self.listener_state.borrow()
    }

    pub fn watch_listener_state(&self) -> watch::Receiver<ListenerState> {
        self.listener_state.subscribe()
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats.snapshot()
    }

    pub fn user(&self) -> Option<UserId> {
        self.state.lock().user.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn stats_handle(&self) -> &SharedListenerStats {
        &self.stats
    }

    // ===== Mutations =====

    /// Bind the store to a new identity (or none): zero the count, forget the
    /// previous value and void every in-flight fetch. Returns the new generation.
    pub(crate) fn rescope(&self, user: Option<UserId>) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.user = user;
        state.next_seq = 0;
        state.applied_seq = 0;
        state.value = 0;
        state.previous = None;
        state.stale = false;
        state.has_new_arrival = false;
        state.arrival_epoch += 1;
        if let Some(timer) = state.arrival_timer.take() {
            timer.abort();
        }
        self.publish(&state);
        state.generation
    }

    pub(crate) fn begin_fetch(&self, generation: u64) -> Option<FetchTicket> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let user = state.user.clone()?;
        state.next_seq += 1;
        self.stats.record(|s| s.fetches_issued += 1);
        Some(FetchTicket {
            generation,
            seq: state.next_seq,
            user,
        })
    }

    pub(crate) fn complete_fetch(
        self: &Arc<Self>,
        ticket: FetchTicket,
        result: Result<u64, CoreError>,
    ) -> FetchOutcome {
        let mut events = Vec::new();

        let outcome = {
            let mut state = self.state.lock();
            if ticket.generation != state.generation {
                self.stats.record(|s| s.fetches_discarded += 1);
                tracing::debug!(
                    kind = %self.kind,
                    seq = ticket.seq,
                    "dropping fetch for a previous identity"
                );
                return FetchOutcome::Discarded;
            }
            if ticket.seq < state.applied_seq {
                self.stats.record(|s| s.fetches_superseded += 1);
                tracing::debug!(
                    kind = %self.kind,
                    seq = ticket.seq,
                    applied = state.applied_seq,
                    "dropping out-of-order fetch"
                );
                return FetchOutcome::Superseded;
            }

            match result {
                Err(error) => {
                    self.stats.record(|s| s.fetches_failed += 1);
                    tracing::warn!(
                        kind = %self.kind,
                        user = %ticket.user,
                        %error,
                        "count fetch failed, keeping last value"
                    );
                    state.stale = true;
                    self.publish(&state);
                    FetchOutcome::Failed
                }
                Ok(value) => {
                    self.stats.record(|s| s.fetches_applied += 1);
                    state.applied_seq = ticket.seq;
                    let previous = state.previous.replace(value);
                    let changed = state.value != value;
                    state.value = value;
                    state.stale = false;

                    if changed {
                        events.push(CoreEvent::CountChanged {
                            kind: self.kind.clone(),
                            user: ticket.user.clone(),
                            value,
                            at: Utc::now(),
                        });
                    }

                    let arrival = self.kind.tracks_arrivals() && is_new_arrival(previous, value);
                    if arrival {
                        tracing::info!(kind = %self.kind, user = %ticket.user, value, "new arrival");
                        self.raise_arrival(&mut state);
                        events.push(CoreEvent::NewArrival {
                            kind: self.kind.clone(),
                            user: ticket.user.clone(),
                            value,
                            at: Utc::now(),
                        });
                        events.push(CoreEvent::Toast(
                            Toast::info(
                                "Nouveau colis",
                                format!("Vous avez maintenant {} colis actifs.", value),
                            )
                            .with_duration(self.arrival_flag),
                        ));
                    }

                    self.publish(&state);
                    FetchOutcome::Applied { changed, arrival }
                }
            }
        };

        for event in events {
            self.events.emit(event);
        }
        outcome
    }

    /// Flag the current value as possibly out of date
    pub(crate) fn mark_stale(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation && state.user.is_some() && !state.stale {
            state.stale = true;
            self.publish(&state);
        }
    }

    pub(crate) fn set_listener_state(&self, next: ListenerState) {
        self.listener_state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(kind = %self.kind, from = ?current, to = ?next, "listener state");
                *current = next;
                true
            }
        });
    }

    fn raise_arrival(self: &Arc<Self>, state: &mut CountState) {
        state.has_new_arrival = true;

        let running = state
            .arrival_timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished());
        if running && !self.restart_arrival_timer {
            return;
        }
        if let Some(timer) = state.arrival_timer.take() {
            timer.abort();
        }

        state.arrival_epoch += 1;
        let epoch = state.arrival_epoch;
        let duration = self.arrival_flag;
        let store: Weak<Self> = Arc::downgrade(self);
        state.arrival_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Some(store) = store.upgrade() {
                store.clear_arrival(epoch);
            }
        }));
    }

    fn clear_arrival(&self, epoch: u64) {
        let mut state = self.state.lock();
        if state.arrival_epoch == epoch && state.has_new_arrival {
            state.has_new_arrival = false;
            state.arrival_timer = None;
            self.publish(&state);
        }
    }

    fn publish(&self, state: &CountState) {
        let next = CountSnapshot {
            value: state.value,
            stale: state.stale,
            has_new_arrival: state.has_new_arrival,
        };
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for CountStore {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().arrival_timer.take() {
            timer.abort();
        }
    }
}
