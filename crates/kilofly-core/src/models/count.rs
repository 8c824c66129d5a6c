use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{ConversationId, UserId};
use crate::backend::{ChangeFilter, CountQuery};
use crate::config::CoreConfig;
use crate::constants::{columns, tables};

/// Which live count a store tracks. The conversation of an unread-message
/// count is part of the kind; the identity is always the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CountKind {
    ActivePackages,
    UnreadConversations,
    UnreadMessages { conversation: ConversationId },
}

impl CountKind {
    pub fn table(&self) -> &'static str {
        match self {
            CountKind::ActivePackages => tables::PACKAGES,
            CountKind::UnreadConversations | CountKind::UnreadMessages { .. } => tables::MESSAGES,
        }
    }

    /// Only package counts drive the "new arrival" flag
    pub fn tracks_arrivals(&self) -> bool {
        matches!(self, CountKind::ActivePackages)
    }

    /// The authoritative predicate for this count
    pub fn count_query(&self, user: &UserId, config: &CoreConfig) -> CountQuery {
        let me = user.as_str();
        match self {
            CountKind::ActivePackages => CountQuery::new(tables::PACKAGES)
                .where_eq(columns::USER_ID, me)
                .where_in(
                    columns::STATUS,
                    config.active_package_statuses.iter().cloned(),
                ),
            CountKind::UnreadConversations => CountQuery::new(tables::MESSAGES)
                .where_eq(columns::RECIPIENT_ID, me)
                .where_eq(columns::READ, false)
                .where_not_eq(columns::SENDER_ID, me)
                .distinct(columns::CONVERSATION_ID),
            CountKind::UnreadMessages { conversation } => CountQuery::new(tables::MESSAGES)
                .where_eq(columns::CONVERSATION_ID, conversation.as_str())
                .where_eq(columns::READ, false)
                .where_not_eq(columns::SENDER_ID, me),
        }
    }

    /// Advisory subscription filter
    pub fn change_filter(&self, user: &UserId) -> ChangeFilter {
        let filter = ChangeFilter::table(self.table());
        match self {
            CountKind::ActivePackages => filter.with_eq(columns::USER_ID, user.as_str()),
            CountKind::UnreadConversations => {
                filter.with_eq(columns::RECIPIENT_ID, user.as_str())
            }
            CountKind::UnreadMessages { conversation } => {
                filter.with_eq(columns::CONVERSATION_ID, conversation.as_str())
            }
        }
    }
}

impl fmt::Display for CountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CountKind::ActivePackages => f.write_str("active_packages"),
            CountKind::UnreadConversations => f.write_str("unread_conversations"),
            CountKind::UnreadMessages { conversation } => {
                write!(f, "unread_messages[{}]", conversation)
            }
        }
    }
}

/// What a view renders for one count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSnapshot {
    pub value: u64,
    /// The last fetch or subscription failed; `value` may be out of date
    pub stale: bool,
    /// A package count just went up
    pub has_new_arrival: bool,
}
