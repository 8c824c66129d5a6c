use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{CountKind, UserId};
use crate::notifications::Toast;
use crate::trust::TrustLevel;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    /// A fetch changed a displayed count
    CountChanged {
        kind: CountKind,
        user: UserId,
        value: u64,
        at: DateTime<Utc>,
    },
    /// A package count went up; the arrival flag is raised
    NewArrival {
        kind: CountKind,
        user: UserId,
        value: u64,
        at: DateTime<Utc>,
    },
    TrustLevelUp {
        from: TrustLevel,
        to: TrustLevel,
        score: u32,
    },
    Toast(Toast),
}

/// Outbound side of the core event channel. Sends never block and a closed
/// or absent receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<CoreEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CoreEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                tracing::trace!("core event receiver closed");
            }
        }
    }

    pub fn toast(&self, toast: Toast) {
        self.emit(CoreEvent::Toast(toast));
    }
}
