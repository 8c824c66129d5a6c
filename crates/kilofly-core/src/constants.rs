//! Application-wide constants
//!
//! Table and column names shared by the count queries, the change filters
//! and the in-memory backend.

/// Default duration of the "new package" flag, in milliseconds
pub const ARRIVAL_FLAG_MS: u64 = 3000;

/// Minimum trust score gain announced when no level change happened
pub const TRUST_POINT_GAIN_THRESHOLD: u32 = 5;

/// Package statuses counted as "active" unless configured otherwise
pub const DEFAULT_ACTIVE_PACKAGE_STATUSES: &[&str] = &["pending", "accepted", "in_transit"];

/// Upper bound on waiting for a subscription acknowledgement
pub const SUBSCRIBE_TIMEOUT_MS: u64 = 10_000;

// Resubscription backoff
pub const RESUBSCRIBE_INITIAL_DELAY_MS: u64 = 500;
pub const RESUBSCRIBE_MAX_DELAY_MS: u64 = 30_000;

// Backend tables and columns
pub mod tables {
    pub const PACKAGES: &str = "packages";
    pub const MESSAGES: &str = "messages";
}

pub mod columns {
    /// Primary key of every row
    pub const ID: &str = "id";
    /// Owner of a package
    pub const USER_ID: &str = "user_id";
    /// Package status
    pub const STATUS: &str = "status";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const SENDER_ID: &str = "sender_id";
    pub const RECIPIENT_ID: &str = "recipient_id";
    /// Message read flag
    pub const READ: &str = "read";
}
