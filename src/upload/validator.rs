//! Admission rules for candidate files.
//!
//! Checks run per candidate in a fixed order: extension, per-file size,
//! unique filename, running aggregate size. The count cap is applied last to the whole
//! incoming set. Nothing here touches the network or coordinator state.

use std::collections::HashSet;
use std::fmt;

use super::types::{CandidateFile, TrackedFile};
use crate::utils::file_size::format_bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLimits {
    /// Lowercase extensions without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub max_file_size: u64,
    pub max_total_size: u64,
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            allowed_extensions: [
                "pdf", "doc", "docx", "txt", "md", "csv", "xlsx", "pptx", "html", "json",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            max_file_size: 50 * 1024 * 1024,
            max_total_size: 100 * 1024 * 1024,
            max_files: 20,
        }
    }
}

impl UploadLimits {
    fn allows_extension(&self, filename: &str) -> bool {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidType,
    TooLarge,
    /// Progress items are matched by filename, so names must be unique in the list.
    DuplicateName,
    AggregateLimit,
    CountLimit,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::InvalidType => "invalid type",
            RejectReason::TooLarge => "too large",
            RejectReason::DuplicateName => "a file with this name is already in the list",
            RejectReason::AggregateLimit => "total size limit reached",
            RejectReason::CountLimit => "too many files",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub file: CandidateFile,
    pub reason: RejectReason,
}

/// One-per-call notices, as opposed to per-file rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionNotice {
    AggregateLimit { max_total_size: u64 },
    CountLimit { max_files: usize },
}

impl fmt::Display for AdmissionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionNotice::AggregateLimit { max_total_size } => write!(
                f,
                "Total upload size limit of {} reached; remaining files were not added.",
                format_bytes(*max_total_size)
            ),
            AdmissionNotice::CountLimit { max_files } => {
                write!(f, "You can upload at most {} files at once.", max_files)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Admission {
    pub admitted: Vec<CandidateFile>,
    pub rejected: Vec<Rejection>,
    pub notices: Vec<AdmissionNotice>,
}

pub fn admit(candidates: Vec<CandidateFile>, current: &[TrackedFile], limits: &UploadLimits) -> Admission {
    let mut admission = Admission::default();
    let mut running_total: u64 = current.iter().map(|f| f.size).sum();
    let mut aggregate_reached = false;
    let mut names: HashSet<String> = current.iter().map(|f| f.filename.clone()).collect();

    for candidate in candidates {
        if aggregate_reached {
            admission.rejected.push(Rejection {
                file: candidate,
                reason: RejectReason::AggregateLimit,
            });
            continue;
        }

        if !limits.allows_extension(&candidate.filename) {
            admission.rejected.push(Rejection {
                file: candidate,
                reason: RejectReason::InvalidType,
            });
            continue;
        }

        if candidate.size > limits.max_file_size {
            admission.rejected.push(Rejection {
                file: candidate,
                reason: RejectReason::TooLarge,
            });
            continue;
        }

        if names.contains(&candidate.filename) {
            admission.rejected.push(Rejection {
                file: candidate,
                reason: RejectReason::DuplicateName,
            });
            continue;
        }

        if running_total.saturating_add(candidate.size) > limits.max_total_size {
            aggregate_reached = true;
            admission.notices.push(AdmissionNotice::AggregateLimit {
                max_total_size: limits.max_total_size,
            });
            admission.rejected.push(Rejection {
                file: candidate,
                reason: RejectReason::AggregateLimit,
            });
            continue;
        }

        running_total += candidate.size;
        names.insert(candidate.filename.clone());
        admission.admitted.push(candidate);
    }

    if current.len() + admission.admitted.len() > limits.max_files {
        admission.notices.push(AdmissionNotice::CountLimit {
            max_files: limits.max_files,
        });
        let over: Vec<_> = admission.admitted.drain(..).collect();
        admission
            .rejected
            .extend(over.into_iter().map(|file| Rejection {
                file,
                reason: RejectReason::CountLimit,
            }));
    }

    admission
}
