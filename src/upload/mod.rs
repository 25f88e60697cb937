mod cancellation;
mod channel;
mod client;
mod coordinator;
mod file_source;
mod reconciler;
mod retry;
mod session;
mod snapshot;
mod submitter;
mod types;
mod validator;

pub use cancellation::{CancelOutcome, CancellationManager};
pub use channel::{subscribe, ChannelEvent, CloseReason, ProgressSubscription};
pub use client::{HttpIngestClient, IngestApi, SnapshotStream};
pub use coordinator::{AdmissionReport, BatchCoordinator, SubmissionRequest, Ticket, SUBMISSION_FAILED_MESSAGE};
pub use file_source::FileSource;
pub use reconciler::{reconcile, BatchSummary, Reconciliation};
pub use retry::{Backoff, Retried, RetryCoordinator, RetryPolicy, Sleeper, TokioSleeper};
pub use session::{AuthContext, IngestEvent, IngestSession};
pub use snapshot::{ItemStatus, Snapshot, SnapshotItem};
pub use submitter::Submitter;
pub use types::{
    AggregateStatus, Batch, BatchHandle, BatchId, CandidateFile, FileId, FileStatus, PayloadSource, Provenance,
    TrackedFile, UploadPart, CANCELLED_MESSAGE,
};
pub use validator::{admit, Admission, AdmissionNotice, RejectReason, Rejection, UploadLimits};
