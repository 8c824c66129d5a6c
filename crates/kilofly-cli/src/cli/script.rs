use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scripted session: rows to start from, then a sequence of steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    /// Initial rows per table
    #[serde(default)]
    pub seed: BTreeMap<String, Vec<Value>>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    SignIn {
        user: String,
    },
    SignOut,
    /// Rows may carry their own `id`; one is generated otherwise
    Insert {
        table: String,
        row: Value,
    },
    Update {
        table: String,
        id: String,
        patch: Value,
    },
    Delete {
        table: String,
        id: String,
    },
    OpenConversation {
        conversation: String,
    },
    CloseConversation {
        conversation: String,
    },
    TrustScore {
        score: u32,
    },
    /// Let time pass, e.g. for the arrival flag to clear
    Wait {
        ms: u64,
    },
    /// Close every open change stream on the backend side
    DropStreams,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse script: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Invalid script")
    }
}
