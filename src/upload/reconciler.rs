//! Folds progress snapshots into the local per-file view.
//!
//! Order of application on every snapshot:
//! 1. Files the snapshot lists as failed become confirmed failures.
//! 2. Files the snapshot lists as completed become confirmed completions.
//! 3. Remaining uploading files whose submission index is below the
//!    processed counter are inferred completed.
//! 4. On a terminal snapshot every file still uploading is confirmed
//!    completed and inferred completions are promoted to confirmed.
//!
//! Transitions only go through [`TrackedFile`]'s guarded methods, so a
//! confirmed terminal status never moves and re-applying a snapshot is a
//! no-op.
//!
//! Step 3 assumes the server finishes files in submission order, which the
//! feed does not promise. Inferred completions carry [`Provenance::Inferred`]
//! so the UI can show them as unconfirmed until step 4 settles them.
//!
//! [`Provenance::Inferred`]: super::types::Provenance::Inferred

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use super::snapshot::Snapshot;
use super::types::{Batch, FileStatus, TrackedFile};
use crate::notify::Severity;

const UNKNOWN_FAILURE: &str = "Processing failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

impl BatchSummary {
    pub fn severity(&self) -> Severity {
        if self.total == 0 {
            Severity::Info
        } else if self.failed == 0 {
            Severity::Success
        } else if self.succeeded == 0 {
            Severity::Error
        } else {
            Severity::Warning
        }
    }
}

fn files(n: usize) -> &'static str {
    if n == 1 {
        "file"
    } else {
        "files"
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            f.write_str("No files were processed.")
        } else if self.failed == 0 {
            write!(f, "All {} {} processed successfully.", self.total, files(self.total))
        } else if self.succeeded == 0 {
            write!(f, "All {} {} failed to process.", self.total, files(self.total))
        } else {
            write!(f, "{} succeeded, {} failed.", self.succeeded, self.failed)
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Number of file transitions this snapshot caused.
    pub changed: usize,
    /// Present only the first time the batch reaches a terminal snapshot.
    pub summary: Option<BatchSummary>,
}

pub fn reconcile(files: &mut [TrackedFile], batch: &mut Batch, snapshot: &Snapshot) -> Reconciliation {
    if batch.absorb(snapshot) {
        warn!(
            "[RECONCILE] batch {} reported counters above its total; clamped to {}",
            batch.id.redacted(),
            batch.total_count
        );
    }

    let failed: HashMap<&str, Option<&str>> = snapshot
        .failed_items()
        .map(|item| (item.filename.as_str(), item.error_message.as_deref()))
        .collect();
    let completed: HashSet<&str> = snapshot
        .completed_items()
        .map(|item| item.filename.as_str())
        .filter(|name| !failed.contains_key(name))
        .collect();
    let processed = batch.processed_high_water as usize;
    let terminal = snapshot.is_terminal();

    let mut changed = 0;
    for file in files
        .iter_mut()
        .filter(|f| f.batch_id.as_ref() == Some(&batch.id))
    {
        // A snapshot can beat the local pending → uploading flip.
        if file.status() == FileStatus::Pending {
            let index = file.submission_index;
            file.mark_uploading(batch.id.clone(), index);
        }

        if let Some(message) = failed.get(file.filename.as_str()) {
            if file.confirm_failed(message.unwrap_or(UNKNOWN_FAILURE)) {
                changed += 1;
            }
            continue;
        }

        if completed.contains(file.filename.as_str()) && file.confirm_completed() {
            changed += 1;
            continue;
        }

        if file.submission_index < processed && file.infer_completed() {
            changed += 1;
        }

        if terminal && file.confirm_completed() {
            changed += 1;
        }
    }

    debug!(
        "[RECONCILE] batch {}: {}/{} processed, {} changes",
        batch.id.redacted(),
        processed,
        batch.total_count,
        changed
    );

    let summary = if terminal && !batch.summarized {
        batch.summarized = true;
        let summary = summarize(files, batch);
        info!("[RECONCILE] batch {} finished: {}", batch.id.redacted(), summary);
        Some(summary)
    } else {
        None
    };

    Reconciliation { changed, summary }
}

fn summarize(files: &[TrackedFile], batch: &Batch) -> BatchSummary {
    let mut summary = BatchSummary {
        succeeded: 0,
        failed: 0,
        total: 0,
    };
    for file in files
        .iter()
        .filter(|f| f.batch_id.as_ref() == Some(&batch.id))
    {
        summary.total += 1;
        match file.status() {
            FileStatus::Completed => summary.succeeded += 1,
            FileStatus::Failed => summary.failed += 1,
            _ => {}
        }
    }
    summary
}
