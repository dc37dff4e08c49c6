//! Removal of generated playlists and segments from the streaming directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CleanupConfig;

/// A single file that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of a cleanup pass. Never an error: failures are reported, not raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CleanupOutcome {
    /// No matching file was found
    NothingToDelete,
    /// Every matching file was removed
    Deleted { count: usize },
    /// Some matching files survived
    Partial {
        deleted: usize,
        failures: Vec<DeletionFailure>,
    },
    /// The directory itself could not be listed
    DirectoryUnreadable { reason: String },
}

impl CleanupOutcome {
    /// True when no artifact is left behind.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            CleanupOutcome::NothingToDelete | CleanupOutcome::Deleted { .. }
        )
    }

    pub fn deleted(&self) -> usize {
        match self {
            CleanupOutcome::Deleted { count } => *count,
            CleanupOutcome::Partial { deleted, .. } => *deleted,
            CleanupOutcome::NothingToDelete | CleanupOutcome::DirectoryUnreadable { .. } => 0,
        }
    }
}

/// Checks whether a file name ends with one of the artifact extensions, ignoring case.
///
/// Compares raw name bytes, so names that are not valid UTF-8 still match.
pub fn is_stream_artifact(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.as_encoded_bytes().to_ascii_lowercase();
    extensions.iter().any(|ext| {
        let suffix = format!(".{}", ext.to_ascii_lowercase());
        name.ends_with(suffix.as_bytes())
    })
}

/// Deletes every regular artifact file directly inside `dir`.
///
/// Non-recursive; the directory itself and non-matching files are never
/// touched. A failed deletion does not stop the others.
pub fn cleanup(dir: &Path, config: &CleanupConfig) -> CleanupOutcome {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "Insufficient permissions to read from the directory '{}': {}",
                dir.display(),
                e
            );
            return CleanupOutcome::DirectoryUnreadable {
                reason: e.to_string(),
            };
        }
    };

    let mut deleted = 0;
    let mut failures = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in '{}': {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !is_stream_artifact(&path, &config.artifact_extensions) {
            continue;
        }

        // Symlinks and directories named like artifacts are left alone.
        match entry.file_type() {
            Ok(file_type) if file_type.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                failures.push(DeletionFailure {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        }

        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!("Impossible to delete the file '{}': {}", path.display(), e);
                failures.push(DeletionFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    if !failures.is_empty() {
        info!("{} deleted stream files", deleted);
        warn!("{} undeleted stream files", failures.len());
        return CleanupOutcome::Partial { deleted, failures };
    }

    if deleted > 0 {
        info!("{} deleted stream files", deleted);
        CleanupOutcome::Deleted { count: deleted }
    } else {
        info!("No stream files to delete found");
        CleanupOutcome::NothingToDelete
    }
}
