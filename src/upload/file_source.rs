use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use ignore::Walk;
use tracing::{debug, warn};

use super::types::CandidateFile;
use crate::error::IngestError;

/// Turns picked paths and folders into upload candidates.
///
/// Only metadata is read here; contents are streamed from disk at submit
/// time. Folder walks honor `.gitignore` plus the configured exclude globs.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    excludes: Vec<Pattern>,
}

impl FileSource {
    pub fn new(exclude_globs: &[String]) -> Result<Self, IngestError> {
        let excludes = exclude_globs
            .iter()
            .map(|g| Pattern::new(g).map_err(|e| IngestError::Config(format!("Invalid exclude pattern '{}': {}", g, e))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { excludes })
    }

    fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        self.excludes
            .iter()
            .any(|p| p.matches_path(relative) || p.matches(&name))
    }

    /// Candidates for individually picked files. Unreadable paths are skipped.
    pub fn from_paths(&self, paths: &[PathBuf]) -> Vec<CandidateFile> {
        paths.iter().filter_map(|p| candidate_for(p)).collect()
    }

    /// Every regular file below `root`, in walk order.
    pub fn walk_folder(&self, root: &Path) -> Vec<CandidateFile> {
        let mut candidates = Vec::new();
        for entry in Walk::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("[FILES] walk error under {}: {}", root.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if self.is_excluded(path, root) {
                debug!("[FILES] excluded {}", path.display());
                continue;
            }
            if let Some(candidate) = candidate_for(path) {
                candidates.push(candidate);
            }
        }
        debug!("[FILES] {} candidates found under {}", candidates.len(), root.display());
        candidates
    }
}

fn candidate_for(path: &Path) -> Option<CandidateFile> {
    let filename = path.file_name()?.to_string_lossy().to_string();
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Some(CandidateFile::on_disk(filename, meta.len(), path.to_path_buf())),
        Ok(_) => None,
        Err(e) => {
            warn!("[FILES] cannot read {}: {}", path.display(), e);
            None
        }
    }
}
