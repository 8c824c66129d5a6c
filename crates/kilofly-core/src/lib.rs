pub mod backend;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod identity;
pub mod live;
pub mod models;
pub mod notifications;
pub mod runtime;
pub mod stats;
pub mod tracing_setup;
pub mod trust;

pub use backend::{ChangeFeedBackend, InMemoryBackend};
pub use config::CoreConfig;
pub use error::CoreError;
pub use events::{CoreEvent, EventSink};
pub use identity::IdentityProvider;
pub use live::{ListenerState, LiveCount};
pub use models::{ConversationId, CountKind, CountSnapshot, UserId};
pub use notifications::{Severity, Toast};
pub use runtime::CoreRuntime;
pub use trust::{TrustLevel, TrustNotifier, TrustTransition};
