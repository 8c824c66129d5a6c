/// Errors raised along the live count path.
///
/// None of these reach a rendered view: the count engine logs them and
/// degrades to the last known value flagged as stale.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Aggregate count on {table} failed: {message}")]
    BackendQuery { table: String, message: String },
    #[error("Subscription to {table} failed: {message}")]
    Subscription { table: String, message: String },
    /// Reserved for malformed change payloads
    #[error("Malformed payload: {message}")]
    Parse { message: String },
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl CoreError {
    pub fn backend_query(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendQuery {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn subscription(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscription {
            table: table.into(),
            message: message.into(),
        }
    }
}
