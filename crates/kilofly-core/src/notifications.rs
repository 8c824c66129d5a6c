// Toasts handed to the visual-notification collaborator: a title, a short
// description, how long to show it and how loud it is.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Toast severity levels (higher = more important)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
}

impl Severity {
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ",
            Severity::Success => "✓",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub duration_ms: u64,
    pub severity: Severity,
}

impl Toast {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        duration: Duration,
        severity: Severity,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            duration_ms: duration.as_millis() as u64,
            severity,
        }
    }

    /// Info toast (default 3 second duration)
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Duration::from_secs(3), Severity::Info)
    }

    /// Success toast (default 5 second duration)
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, description, Duration::from_secs(5), Severity::Success)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
