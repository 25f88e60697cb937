//! Progress-channel events.
//!
//! Snapshots are partial: failed items are always listed, completed items
//! may or may not be. Field names follow the wire format directly.

use serde::Deserialize;

use super::types::{AggregateStatus, BatchId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotItem {
    pub filename: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(default, rename = "id")]
    pub batch_id: Option<BatchId>,
    #[serde(default)]
    pub total_files: u32,
    #[serde(default)]
    pub completed_files: u32,
    #[serde(default)]
    pub failed_files: u32,
    pub status: AggregateStatus,
    #[serde(default, rename = "files")]
    pub items: Vec<SnapshotItem>,
}

impl Snapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn processed(&self) -> u32 {
        self.completed_files.saturating_add(self.failed_files)
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &SnapshotItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
    }

    pub fn completed_items(&self) -> impl Iterator<Item = &SnapshotItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
    }

    /// Parses one `data:` payload from the progress stream.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
