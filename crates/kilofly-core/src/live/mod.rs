//! Live counts: a point-in-time aggregate query, re-run in full whenever the
//! change feed reports a mutation in the watched table.
//!
//! - [`store::CountStore`] holds the displayed value and publishes snapshots
//! - [`fetcher::CountFetcher`] issues the aggregate query
//! - [`listener`] owns the backend subscription
//! - [`LiveCount`] ties them to an explicit identity

pub mod fetcher;
pub mod listener;
pub mod live_count;
pub mod store;

pub use listener::ListenerState;
pub use live_count::LiveCount;
pub use store::{is_new_arrival, CountStore};
