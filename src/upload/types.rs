use derivative::Derivative;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::snapshot::Snapshot;

/// Message stored on files force-terminated by a user cancel.
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Local identifier for a tracked file, stable across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

/// Backend-assigned batch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// First 8 characters, for log lines.
    pub fn redacted(&self) -> String {
        if self.0.len() > 8 {
            format!("{}...", &self.0[..8])
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Cancelled
        )
    }
}

/// Whether a status was reported by the server or guessed from aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Inferred,
    Confirmed,
}

/// Where a file's bytes come from. Disk payloads are read at submission time.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub enum PayloadSource {
    Memory(#[derivative(Debug = "ignore")] Arc<[u8]>),
    Disk(PathBuf),
}

/// A file offered for admission, before validation.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub filename: String,
    pub size: u64,
    pub payload: PayloadSource,
}

impl CandidateFile {
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        Self {
            filename: filename.into(),
            size: bytes.len() as u64,
            payload: PayloadSource::Memory(bytes),
        }
    }

    pub fn on_disk(filename: impl Into<String>, size: u64, path: PathBuf) -> Self {
        Self {
            filename: filename.into(),
            size,
            payload: PayloadSource::Disk(path),
        }
    }
}

/// One file sent in a submission request.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub filename: String,
    pub payload: PayloadSource,
}

/// Client-side record of one admitted file.
///
/// Status changes go through the transition methods below, which refuse
/// anything that would move a confirmed terminal status backwards.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct TrackedFile {
    pub id: FileId,
    pub filename: String,
    pub size: u64,
    #[derivative(Debug = "ignore")]
    pub payload: PayloadSource,
    pub batch_id: Option<BatchId>,
    /// Position within the batch it was last submitted in.
    pub submission_index: usize,
    status: FileStatus,
    provenance: Provenance,
    error_message: Option<String>,
}

impl TrackedFile {
    pub fn new(id: FileId, candidate: CandidateFile) -> Self {
        Self {
            id,
            filename: candidate.filename,
            size: candidate.size,
            payload: candidate.payload,
            batch_id: None,
            submission_index: 0,
            status: FileStatus::Pending,
            provenance: Provenance::Confirmed,
            error_message: None,
        }
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_inferred(&self) -> bool {
        self.provenance == Provenance::Inferred
    }

    pub fn to_part(&self) -> UploadPart {
        UploadPart {
            filename: self.filename.clone(),
            payload: self.payload.clone(),
        }
    }

    /// pending → uploading, binding the file to the batch that accepted it.
    pub fn mark_uploading(&mut self, batch_id: BatchId, submission_index: usize) -> bool {
        if self.status != FileStatus::Pending {
            return false;
        }
        self.batch_id = Some(batch_id);
        self.submission_index = submission_index;
        self.status = FileStatus::Uploading;
        true
    }

    /// Guess from aggregate counters. Only an uploading file can be guessed at.
    pub fn infer_completed(&mut self) -> bool {
        if self.status != FileStatus::Uploading {
            return false;
        }
        self.status = FileStatus::Completed;
        self.provenance = Provenance::Inferred;
        true
    }

    /// Server-confirmed completion. Upgrades an inferred completion in place.
    pub fn confirm_completed(&mut self) -> bool {
        match (self.status, self.provenance) {
            (FileStatus::Pending | FileStatus::Uploading, _)
            | (FileStatus::Completed, Provenance::Inferred) => {
                self.status = FileStatus::Completed;
                self.provenance = Provenance::Confirmed;
                true
            }
            _ => false,
        }
    }

    /// Server-confirmed failure. Overrides an inferred completion.
    pub fn confirm_failed(&mut self, message: impl Into<String>) -> bool {
        match (self.status, self.provenance) {
            (FileStatus::Pending | FileStatus::Uploading, _)
            | (FileStatus::Completed, Provenance::Inferred) => {
                self.status = FileStatus::Failed;
                self.provenance = Provenance::Confirmed;
                self.error_message = Some(message.into());
                true
            }
            _ => false,
        }
    }

    /// Submission gave up before the server accepted the file.
    pub fn fail_submission(&mut self, message: impl Into<String>) -> bool {
        if self.status != FileStatus::Pending {
            return false;
        }
        self.status = FileStatus::Failed;
        self.provenance = Provenance::Confirmed;
        self.error_message = Some(message.into());
        true
    }

    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = FileStatus::Cancelled;
        self.provenance = Provenance::Confirmed;
        self.error_message = Some(CANCELLED_MESSAGE.to_string());
        true
    }

    /// Manual retry: failed → pending, detached from its old batch.
    pub fn reset_for_retry(&mut self) -> bool {
        if self.status != FileStatus::Failed {
            return false;
        }
        self.status = FileStatus::Pending;
        self.provenance = Provenance::Confirmed;
        self.error_message = None;
        self.batch_id = None;
        self.submission_index = 0;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    #[serde(alias = "pending", alias = "uploading")]
    Processing,
    Completed,
    Failed,
}

impl AggregateStatus {
    pub fn is_terminal(self) -> bool {
        self != AggregateStatus::Processing
    }
}

/// Returned by the submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHandle {
    pub id: BatchId,
}

/// Server-side view of one submitted batch, as far as snapshots have told us.
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: BatchId,
    pub total_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
    pub aggregate_status: AggregateStatus,
    /// Highest `completed + failed` seen so far.
    pub processed_high_water: u32,
    /// Set when the progress channel failed before a terminal snapshot.
    pub channel_lost: bool,
    /// Set once the terminal summary has been emitted.
    pub summarized: bool,
}

impl Batch {
    pub fn new(id: BatchId, total_count: u32) -> Self {
        Self {
            id,
            total_count,
            completed_count: 0,
            failed_count: 0,
            aggregate_status: AggregateStatus::Processing,
            processed_high_water: 0,
            channel_lost: false,
            summarized: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.aggregate_status.is_terminal() || self.channel_lost
    }

    /// Folds a snapshot's counters in, keeping `completed + failed <= total`
    /// and never leaving a terminal aggregate status.
    pub fn absorb(&mut self, snapshot: &Snapshot) -> bool {
        let mut clamped = false;
        if snapshot.total_files > 0 {
            self.total_count = self.total_count.max(snapshot.total_files);
        }

        let failed = snapshot.failed_files.min(self.total_count);
        let completed = snapshot
            .completed_files
            .min(self.total_count.saturating_sub(failed));
        if failed != snapshot.failed_files || completed != snapshot.completed_files {
            clamped = true;
        }

        self.completed_count = completed;
        self.failed_count = failed;
        self.processed_high_water = self.processed_high_water.max(completed + failed);

        if !self.aggregate_status.is_terminal() {
            self.aggregate_status = snapshot.status;
        }
        clamped
    }

    pub fn progress_fraction(&self) -> f32 {
        if self.total_count == 0 {
            return 0.0;
        }
        if self.aggregate_status.is_terminal() {
            return 1.0;
        }
        self.processed_high_water as f32 / self.total_count as f32
    }
}
