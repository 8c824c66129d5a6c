pub mod count;
pub mod ids;

pub use count::{CountKind, CountSnapshot};
pub use ids::{ConversationId, UserId};
