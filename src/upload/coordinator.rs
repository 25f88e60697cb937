//! Single owner of the tracked-file list.
//!
//! Every mutation happens through `&mut self`, driven one event at a time
//! by the session, so no locking is needed. Async work (submission, the
//! progress channel) lives elsewhere and reports back through the `on_*`
//! methods, in whatever order it completes.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info, warn};

use super::cancellation::{CancelOutcome, CancellationManager};
use super::channel::{CloseReason, ProgressSubscription};
use super::reconciler::{reconcile, Reconciliation};
use super::snapshot::Snapshot;
use super::types::{Batch, BatchHandle, BatchId, CandidateFile, FileId, FileStatus, TrackedFile, UploadPart};
use super::validator::{admit, AdmissionNotice, RejectReason, UploadLimits};
use crate::error::IngestError;
use crate::notify::{DismissPolicy, Notification, Severity};
use crate::utils::file_size::format_bytes;

/// Shared message for files whose submission gave up.
pub const SUBMISSION_FAILED_MESSAGE: &str = "Upload failed. Please try again.";

/// Identifies one submission request while it is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug)]
pub struct SubmissionRequest {
    pub ticket: Ticket,
    pub parts: Vec<UploadPart>,
}

#[derive(Debug, Default)]
pub struct AdmissionReport {
    pub admitted: Vec<FileId>,
    pub rejected: Vec<(String, RejectReason)>,
    pub notices: Vec<AdmissionNotice>,
}

struct InFlight {
    ticket: Ticket,
    file_ids: Vec<FileId>,
}

pub struct BatchCoordinator {
    files: Vec<TrackedFile>,
    limits: UploadLimits,
    dismiss: DismissPolicy,
    next_file_id: u64,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    abandoned: HashSet<Ticket>,
    active: Option<Batch>,
    subscription: Option<ProgressSubscription>,
    cancellation: CancellationManager,
    notifications: VecDeque<Notification>,
}

impl BatchCoordinator {
    pub fn new(limits: UploadLimits, dismiss: DismissPolicy) -> Self {
        Self {
            files: Vec::new(),
            limits,
            dismiss,
            next_file_id: 1,
            next_ticket: 1,
            in_flight: None,
            abandoned: HashSet::new(),
            active: None,
            subscription: None,
            cancellation: CancellationManager::new(),
            notifications: VecDeque::new(),
        }
    }

    pub fn files(&self) -> &[TrackedFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn active_batch(&self) -> Option<&Batch> {
        self.active.as_ref()
    }

    pub fn has_open_channel(&self) -> bool {
        self.subscription.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// A submission is in flight or the active batch is still processing.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some() || self.active.as_ref().is_some_and(|b| !b.is_terminal())
    }

    pub fn pending_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status() == FileStatus::Pending && f.batch_id.is_none())
            .count()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    fn notify(&mut self, severity: Severity, message: impl Into<String>) {
        self.notifications.push_back(self.dismiss.build(severity, message));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Admission and list edits
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_candidates(&mut self, candidates: Vec<CandidateFile>) -> AdmissionReport {
        let admission = admit(candidates, &self.files, &self.limits);
        let mut report = AdmissionReport {
            notices: admission.notices.clone(),
            ..AdmissionReport::default()
        };

        for candidate in admission.admitted {
            let id = FileId(self.next_file_id);
            self.next_file_id += 1;
            self.files.push(TrackedFile::new(id, candidate));
            report.admitted.push(id);
        }

        for rejection in admission.rejected {
            if matches!(
                rejection.reason,
                RejectReason::InvalidType | RejectReason::TooLarge | RejectReason::DuplicateName
            ) {
                let detail = match rejection.reason {
                    RejectReason::TooLarge => format!(
                        "{} ({}): {}",
                        rejection.file.filename,
                        format_bytes(rejection.file.size),
                        rejection.reason
                    ),
                    _ => format!("{}: {}", rejection.file.filename, rejection.reason),
                };
                self.notify(Severity::Warning, detail);
            }
            report
                .rejected
                .push((rejection.file.filename, rejection.reason));
        }

        for notice in &admission.notices {
            self.notify(Severity::Warning, notice.to_string());
        }

        if !report.admitted.is_empty() {
            debug!("[ADMIT] {} files admitted, {} rejected", report.admitted.len(), report.rejected.len());
        }
        report
    }

    /// Files that are uploading or part of an in-flight request stay put.
    pub fn remove_file(&mut self, id: FileId) -> bool {
        let in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.file_ids.contains(&id));
        let Some(pos) = self.files.iter().position(|f| f.id == id) else {
            return false;
        };
        if in_flight || self.files[pos].status() == FileStatus::Uploading {
            return false;
        }
        self.files.remove(pos);
        true
    }

    /// Cancels whatever is running, then forgets every file.
    pub fn clear(&mut self) {
        if self.is_busy() {
            self.cancel_quietly();
        }
        self.files.clear();
        self.active = None;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────────────

    pub fn begin_submission(&mut self) -> Result<SubmissionRequest, IngestError> {
        if self.is_busy() {
            return Err(IngestError::Busy);
        }
        let file_ids: Vec<FileId> = self
            .files
            .iter()
            .filter(|f| f.status() == FileStatus::Pending && f.batch_id.is_none())
            .map(|f| f.id)
            .collect();
        if file_ids.is_empty() {
            return Err(IngestError::Validation("No files waiting to upload".to_string()));
        }
        Ok(self.open_request(file_ids))
    }

    /// Manual retry of one failed file. Siblings are not touched.
    pub fn begin_retry(&mut self, id: FileId) -> Result<SubmissionRequest, IngestError> {
        if self.is_busy() {
            return Err(IngestError::Busy);
        }
        let file = self
            .files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| IngestError::Validation("File is no longer in the list".to_string()))?;
        if !file.reset_for_retry() {
            return Err(IngestError::Validation(format!(
                "{} has not failed and cannot be retried",
                file.filename
            )));
        }
        info!("[SUBMIT] manual retry of {}", file.filename);
        Ok(self.open_request(vec![id]))
    }

    fn open_request(&mut self, file_ids: Vec<FileId>) -> SubmissionRequest {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let parts = file_ids
            .iter()
            .filter_map(|id| self.file(*id))
            .map(TrackedFile::to_part)
            .collect();

        self.in_flight = Some(InFlight { ticket, file_ids });
        SubmissionRequest { ticket, parts }
    }

    fn current_request(&self, ticket: Ticket) -> bool {
        self.in_flight.as_ref().is_some_and(|f| f.ticket == ticket)
    }

    pub fn on_retrying(&mut self, ticket: Ticket, attempt: u32, max_attempts: u32, reason: &str) {
        if !self.current_request(ticket) {
            return;
        }
        debug!("[SUBMIT] attempt {} failed: {}", attempt, reason);
        self.notify(
            Severity::Info,
            format!("Upload failed, retrying ({}/{})...", attempt + 1, max_attempts),
        );
    }

    /// Returns the batch id when a progress channel should be opened for it.
    pub fn on_submitted(&mut self, ticket: Ticket, handle: BatchHandle, retries: u32) -> Option<BatchId> {
        if self.abandoned.remove(&ticket) || !self.current_request(ticket) {
            info!(
                "[SUBMIT] batch {} accepted after cancellation, ignoring",
                handle.id.redacted()
            );
            self.cancellation.mark_stale(handle.id);
            return None;
        }
        let in_flight = self.in_flight.take()?;

        let mut count = 0u32;
        for (index, id) in in_flight.file_ids.iter().enumerate() {
            if let Some(file) = self.files.iter_mut().find(|f| f.id == *id) {
                if file.mark_uploading(handle.id.clone(), index) {
                    count += 1;
                }
            }
        }

        info!("[SUBMIT] batch {} started with {} files", handle.id.redacted(), count);
        self.active = Some(Batch::new(handle.id.clone(), count));

        let noun = if count == 1 { "file" } else { "files" };
        match retries {
            0 => self.notify(Severity::Info, format!("Processing {} {}...", count, noun)),
            1 => self.notify(Severity::Success, "Upload submitted after 1 retry."),
            n => self.notify(Severity::Success, format!("Upload submitted after {} retries.", n)),
        }
        Some(handle.id)
    }

    pub fn on_submission_failed(&mut self, ticket: Ticket, error: &IngestError) {
        if self.abandoned.remove(&ticket) || !self.current_request(ticket) {
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };

        for file in self
            .files
            .iter_mut()
            .filter(|f| in_flight.file_ids.contains(&f.id))
        {
            file.fail_submission(SUBMISSION_FAILED_MESSAGE);
        }
        warn!("[SUBMIT] giving up on {} files: {}", in_flight.file_ids.len(), error);
        self.notify(Severity::Error, format!("Upload failed: {}", error.user_message()));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Progress channel
    // ─────────────────────────────────────────────────────────────────────

    pub fn attach_subscription(&mut self, subscription: ProgressSubscription) {
        let wanted = self
            .active
            .as_ref()
            .is_some_and(|b| &b.id == subscription.batch_id() && !b.is_terminal());
        if wanted {
            self.subscription = Some(subscription);
        } else {
            subscription.close(CloseReason::Teardown);
        }
    }

    fn accepts(&self, batch_id: &BatchId) -> bool {
        if self.cancellation.is_stale(batch_id) {
            debug!("[RECONCILE] dropping event for stale batch {}", batch_id.redacted());
            return false;
        }
        self.active.as_ref().is_some_and(|b| &b.id == batch_id)
    }

    pub fn on_snapshot(&mut self, batch_id: &BatchId, snapshot: &Snapshot) -> Option<Reconciliation> {
        if !self.accepts(batch_id) {
            return None;
        }
        if snapshot.batch_id.as_ref().is_some_and(|id| id != batch_id) {
            warn!("[RECONCILE] snapshot for another batch arrived on {}", batch_id.redacted());
            return None;
        }

        let batch = self.active.as_mut()?;
        let result = reconcile(&mut self.files, batch, snapshot);
        let terminal = batch.is_terminal();

        if terminal {
            self.close_channel(CloseReason::Terminal);
        }
        if let Some(summary) = result.summary {
            self.notify(summary.severity(), summary.to_string());
        }
        Some(result)
    }

    /// Files keep their last-known status; the batch stops waiting.
    pub fn on_channel_error(&mut self, batch_id: &BatchId, error: &IngestError) {
        if !self.accepts(batch_id) {
            return;
        }
        let Some(batch) = self.active.as_mut() else {
            return;
        };
        if batch.is_terminal() {
            return;
        }
        batch.channel_lost = true;
        warn!("[CHANNEL] batch {} lost: {}", batch_id.redacted(), error);
        self.close_channel(CloseReason::ChannelError);
        self.notify(
            Severity::Error,
            "Lost connection to processing updates. File statuses may be out of date.",
        );
    }

    fn close_channel(&mut self, reason: CloseReason) {
        if let Some(subscription) = self.subscription.take() {
            subscription.close(reason);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────

    pub fn cancel(&mut self) -> CancelOutcome {
        let outcome = self.cancel_quietly();
        if outcome.cancelled_files > 0 {
            self.notify(Severity::Info, "Upload cancelled.");
        }
        outcome
    }

    fn cancel_quietly(&mut self) -> CancelOutcome {
        if let Some(in_flight) = self.in_flight.take() {
            self.abandoned.insert(in_flight.ticket);
        }

        let batch_id = self
            .active
            .as_ref()
            .filter(|b| !b.is_terminal())
            .map(|b| b.id.clone());
        let outcome = self
            .cancellation
            .cancel(&mut self.files, batch_id.as_ref(), self.subscription.take());

        if batch_id.is_some() {
            self.active = None;
        }
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────
    // Presentation helpers
    // ─────────────────────────────────────────────────────────────────────

    pub fn progress_fraction(&self) -> f32 {
        self.active.as_ref().map(Batch::progress_fraction).unwrap_or(0.0)
    }

    pub fn status_text(&self) -> String {
        let count = |status: FileStatus| self.files.iter().filter(|f| f.status() == status).count();
        let total = self.files.len();
        if total == 0 {
            return String::new();
        }
        format!(
            "{} files | ✅ Completed: {} | ⏳ Uploading: {} | ❌ Failed: {} | ⏹ Cancelled: {}",
            total,
            count(FileStatus::Completed),
            count(FileStatus::Uploading) + count(FileStatus::Pending),
            count(FileStatus::Failed),
            count(FileStatus::Cancelled)
        )
    }
}
