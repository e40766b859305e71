//! SFTP-backed [`RemoteFs`]
//!
//! Maps SFTP status codes (draft-ietf-secsh-filexfer-02, Section 7) onto
//! [`FileError`] kinds keyed by the path the operation touched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh::Channel;
use russh::client::Msg;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::{File, Metadata};
use russh_sftp::protocol::StatusCode;
use tracing::debug;

use crate::error::{Error, FileError, Result};
use crate::remote_fs::{
    EntryKind, RemoteFileEntry, RemoteFs, join_remote, permission_string, remote_base_name,
};

/// Operation being performed, used to refine generic `SSH_FX_FAILURE` replies
#[derive(Debug, Clone, Copy)]
enum Op {
    List,
    Stat,
    Open,
    Create,
    Remove,
    RemoveDirectory,
    Rename,
}

/// SFTP session on an SSH channel
pub struct SftpChannel {
    session: SftpSession,
}

impl SftpChannel {
    /// Initialise SFTP on a channel whose `sftp` subsystem request succeeded
    pub async fn start(channel: Channel<Msg>) -> Result<Self> {
        let session = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Sftp(e.to_string()))?;
        Ok(Self { session })
    }

    /// Resolve `path` against the login directory
    pub async fn canonicalize(&self, path: &str) -> Result<String> {
        self.session
            .canonicalize(path)
            .await
            .map_err(|e| map_error(e, path, Op::Stat))
    }

    async fn exists(&self, path: &str) -> bool {
        self.session.metadata(path).await.is_ok()
    }

    async fn has_children(&self, path: &str) -> bool {
        match self.session.read_dir(path).await {
            Ok(entries) => entries
                .into_iter()
                .any(|entry| !matches!(entry.file_name().as_str(), "." | "..")),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl RemoteFs for SftpChannel {
    type Reader = File;
    type Writer = File;

    async fn list(&self, path: &str) -> Result<Vec<RemoteFileEntry>> {
        let entries = self
            .session
            .read_dir(path)
            .await
            .map_err(|e| map_error(e, path, Op::List))?;

        Ok(entries
            .into_iter()
            .filter(|entry| !matches!(entry.file_name().as_str(), "." | ".."))
            .map(|entry| {
                let name = entry.file_name();
                let full_path = join_remote(path, &name);
                to_entry(name, full_path, &entry.metadata())
            })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<RemoteFileEntry> {
        let metadata = self
            .session
            .metadata(path)
            .await
            .map_err(|e| map_error(e, path, Op::Stat))?;
        Ok(to_entry(
            remote_base_name(path).to_string(),
            path.to_string(),
            &metadata,
        ))
    }

    async fn open(&self, path: &str) -> Result<File> {
        self.session
            .open(path)
            .await
            .map_err(|e| map_error(e, path, Op::Open))
    }

    async fn create(&self, path: &str) -> Result<File> {
        self.session
            .create(path)
            .await
            .map_err(|e| map_error(e, path, Op::Create))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.session
            .remove_file(path)
            .await
            .map_err(|e| map_error(e, path, Op::Remove))
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        match self.session.remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if is_generic_failure(&e) && self.has_children(path).await => {
                Err(FileError::NotEmpty(path.to_string()).into())
            }
            Err(e) => Err(map_error(e, path, Op::RemoveDirectory)),
        }
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        match self.session.rename(old_path, new_path).await {
            Ok(()) => Ok(()),
            Err(e) if is_generic_failure(&e) && self.exists(new_path).await => {
                Err(FileError::AlreadyExists(new_path.to_string()).into())
            }
            Err(e) => Err(map_error(e, old_path, Op::Rename)),
        }
    }
}

fn to_entry(name: String, path: String, metadata: &Metadata) -> RemoteFileEntry {
    let modified_at = metadata
        .mtime
        .and_then(|mtime| DateTime::<Utc>::from_timestamp(i64::from(mtime), 0))
        .unwrap_or_default();
    RemoteFileEntry {
        name,
        path,
        size: metadata.size.unwrap_or(0),
        kind: if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        modified_at,
        permissions: permission_string(metadata.permissions.unwrap_or(0)),
    }
}

fn is_generic_failure(err: &SftpError) -> bool {
    matches!(err, SftpError::Status(status) if status.status_code == StatusCode::Failure)
}

/// Map an SFTP error for `path` onto the error taxonomy
///
/// NIST 800-53: SI-11 (Error Handling)
/// Implementation: Remote status text is kept for logs; the kind decides the response
fn map_error(err: SftpError, path: &str, op: Op) -> Error {
    let SftpError::Status(status) = err else {
        debug!(path = %path, op = ?op, error = %err, "SFTP transport failure");
        return Error::Sftp(err.to_string());
    };
    let path = path.to_string();
    match status.status_code {
        StatusCode::NoSuchFile => FileError::NotFound(path).into(),
        StatusCode::PermissionDenied => FileError::PermissionDenied(path).into(),
        StatusCode::NoConnection | StatusCode::ConnectionLost => {
            Error::ChannelClosed(status.error_message)
        }
        StatusCode::BadMessage | StatusCode::OpUnsupported => Error::Sftp(format!(
            "{op:?} {path}: {}",
            status.error_message
        )),
        _ => FileError::Failure {
            path,
            message: status.error_message,
        }
        .into(),
    }
}
