use std::collections::HashSet;

use tracing::info;

use super::channel::{CloseReason, ProgressSubscription};
use super::types::{BatchId, TrackedFile};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    pub cancelled_files: usize,
    pub channel_closed: bool,
}

/// Tears batches down and remembers which batch ids are dead, so late
/// snapshots for them are dropped without touching file state.
#[derive(Debug, Default)]
pub struct CancellationManager {
    stale: HashSet<BatchId>,
}

impl CancellationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stale(&self, batch_id: &BatchId) -> bool {
        self.stale.contains(batch_id)
    }

    pub fn mark_stale(&mut self, batch_id: BatchId) {
        self.stale.insert(batch_id);
    }

    /// Closes the subscription (at most once), force-cancels every
    /// non-terminal file and marks the batch stale. Files already completed
    /// or failed keep their status.
    pub fn cancel(
        &mut self,
        files: &mut [TrackedFile],
        batch_id: Option<&BatchId>,
        subscription: Option<ProgressSubscription>,
    ) -> CancelOutcome {
        let channel_closed = subscription
            .map(|sub| sub.close(CloseReason::Cancelled))
            .unwrap_or(false);

        let cancelled_files = files.iter_mut().map(|f| f.cancel()).filter(|c| *c).count();

        if let Some(id) = batch_id {
            info!(
                "[CANCEL] batch {} cancelled, {} files stopped",
                id.redacted(),
                cancelled_files
            );
            self.mark_stale(id.clone());
        }

        CancelOutcome {
            cancelled_files,
            channel_closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{CandidateFile, FileId, FileStatus, CANCELLED_MESSAGE};

    fn uploading(i: u64, batch: &BatchId) -> TrackedFile {
        let mut f = TrackedFile::new(FileId(i), CandidateFile::from_bytes(format!("{}.pdf", i), vec![0u8]));
        f.mark_uploading(batch.clone(), i as usize);
        f
    }

    #[test]
    fn cancels_only_non_terminal_files() {
        let batch = BatchId("b1".into());
        let mut files = vec![uploading(0, &batch), uploading(1, &batch), uploading(2, &batch)];
        files[0].confirm_completed();

        let mut manager = CancellationManager::new();
        let outcome = manager.cancel(&mut files, Some(&batch), None);

        assert_eq!(outcome.cancelled_files, 2);
        assert!(!outcome.channel_closed);
        assert_eq!(files[0].status(), FileStatus::Completed);
        assert_eq!(files[1].status(), FileStatus::Cancelled);
        assert_eq!(files[2].error_message(), Some(CANCELLED_MESSAGE));
        assert!(manager.is_stale(&batch));
    }

    #[test]
    fn cancel_twice_is_harmless() {
        let batch = BatchId("b1".into());
        let mut files = vec![uploading(0, &batch)];
        let mut manager = CancellationManager::new();

        manager.cancel(&mut files, Some(&batch), None);
        let second = manager.cancel(&mut files, Some(&batch), None);
        assert_eq!(second, CancelOutcome::default());
    }
}
