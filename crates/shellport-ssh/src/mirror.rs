//! Recursive remote-to-local directory mirroring
//!
//! A [`TransferTask`] copies a remote tree into a local directory depth
//! first, recording one outcome per entry. The first failure stops the
//! transfer and is returned together with the number of entries already
//! completed.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Error, Result, TransferError};
use crate::remote_fs::{EntryKind, RemoteFs, validate_entry_name};

/// Result of transferring one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Copied; for directories, created locally
    Completed { bytes: u64 },
    Failed { reason: String },
}

/// Per-entry record kept by a transfer
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub kind: EntryKind,
    pub status: EntryStatus,
}

/// Totals of a finished transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// One directory mirroring job
pub struct TransferTask {
    remote_root: String,
    local_root: PathBuf,
    outcomes: Vec<EntryOutcome>,
}

impl TransferTask {
    pub fn new(remote_root: impl Into<String>, local_root: impl Into<PathBuf>) -> Self {
        Self {
            remote_root: remote_root.into(),
            local_root: local_root.into(),
            outcomes: Vec::new(),
        }
    }

    /// Outcomes in the order entries were processed
    pub fn outcomes(&self) -> &[EntryOutcome] {
        &self.outcomes
    }

    /// Number of entries transferred successfully
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, EntryStatus::Completed { .. }))
            .count()
    }

    pub fn report(&self) -> TransferReport {
        let mut report = TransferReport::default();
        for outcome in &self.outcomes {
            if let EntryStatus::Completed { bytes } = outcome.status {
                match outcome.kind {
                    EntryKind::File => report.files += 1,
                    EntryKind::Directory => report.directories += 1,
                }
                report.bytes += bytes;
            }
        }
        report
    }

    /// Mirror the remote tree into the local root
    ///
    /// The local root is created if missing. Directories are created before
    /// anything inside them is written.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] naming the first entry that failed.
    pub async fn run<F: RemoteFs>(&mut self, fs: &F) -> std::result::Result<TransferReport, TransferError> {
        let local_root = self.local_root.clone();
        let remote_root = self.remote_root.clone();

        if let Err(e) = tokio::fs::create_dir_all(&local_root).await {
            return Err(self.fail(&remote_root, &local_root, EntryKind::Directory, e.into()));
        }

        let mut pending = vec![(remote_root, local_root)];
        while let Some((remote_dir, local_dir)) = pending.pop() {
            let entries = match fs.list(&remote_dir).await {
                Ok(entries) => entries,
                Err(e) => return Err(self.fail(&remote_dir, &local_dir, EntryKind::Directory, e)),
            };

            for entry in entries {
                let local_path = local_dir.join(&entry.name);
                if let Err(e) = validate_entry_name(&entry.name) {
                    return Err(self.fail(&entry.path, &local_path, entry.kind, e));
                }

                match entry.kind {
                    EntryKind::Directory => {
                        if let Err(e) = tokio::fs::create_dir_all(&local_path).await {
                            return Err(self.fail(&entry.path, &local_path, entry.kind, e.into()));
                        }
                        self.record(&entry.path, &local_path, entry.kind, 0);
                        pending.push((entry.path, local_path));
                    }
                    EntryKind::File => match copy_file(fs, &entry.path, &local_path).await {
                        Ok(bytes) => self.record(&entry.path, &local_path, entry.kind, bytes),
                        Err(e) => return Err(self.fail(&entry.path, &local_path, entry.kind, e)),
                    },
                }
            }
        }

        let report = self.report();
        info!(
            event = "directory_mirrored",
            remote_path = %self.remote_root,
            files = report.files,
            directories = report.directories,
            bytes = report.bytes,
            "Remote directory mirrored"
        );
        Ok(report)
    }

    fn record(&mut self, remote_path: &str, local_path: &Path, kind: EntryKind, bytes: u64) {
        debug!(remote_path = %remote_path, bytes, "Entry transferred");
        self.outcomes.push(EntryOutcome {
            remote_path: remote_path.to_string(),
            local_path: local_path.to_path_buf(),
            kind,
            status: EntryStatus::Completed { bytes },
        });
    }

    fn fail(&mut self, remote_path: &str, local_path: &Path, kind: EntryKind, error: Error) -> TransferError {
        self.outcomes.push(EntryOutcome {
            remote_path: remote_path.to_string(),
            local_path: local_path.to_path_buf(),
            kind,
            status: EntryStatus::Failed {
                reason: error.to_string(),
            },
        });
        TransferError {
            path: remote_path.to_string(),
            completed: self.completed(),
            source: Box::new(error),
        }
    }
}

/// Mirror `remote_path` into `local_root`
pub async fn mirror<F: RemoteFs>(fs: &F, remote_path: &str, local_root: &Path) -> Result<TransferReport> {
    let mut task = TransferTask::new(remote_path, local_root);
    Ok(task.run(fs).await?)
}

/// Stream one remote file to a local path; handles are closed before returning
async fn copy_file<F: RemoteFs>(fs: &F, remote_path: &str, local_path: &Path) -> Result<u64> {
    let mut reader = fs.open(remote_path).await?;
    let mut file = tokio::fs::File::create(local_path).await?;
    let bytes = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    Ok(bytes)
}
