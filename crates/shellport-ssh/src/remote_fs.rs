//! Remote filesystem abstraction
//!
//! Directory mirroring, archiving and the single-file operations are written
//! against [`RemoteFs`] so they run the same way over an SFTP channel and
//! over the local backend used in tests.
//!
//! Remote paths are POSIX strings regardless of the gateway's platform.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Kind of a remote directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata of one remote directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteFileEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "modifyTime")]
    pub modified_at: DateTime<Utc>,
    /// Mode rendered as `drwxr-xr-x`
    pub permissions: String,
}

impl RemoteFileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// File operations needed from a remote host
#[async_trait]
pub trait RemoteFs: Send + Sync {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// List `path`, excluding `.` and `..`
    async fn list(&self, path: &str) -> Result<Vec<RemoteFileEntry>>;

    async fn stat(&self, path: &str) -> Result<RemoteFileEntry>;

    async fn open(&self, path: &str) -> Result<Self::Reader>;

    /// Create or truncate `path` for writing
    async fn create(&self, path: &str) -> Result<Self::Writer>;

    /// Remove a file
    async fn remove(&self, path: &str) -> Result<()>;

    /// Remove an empty directory
    async fn remove_directory(&self, path: &str) -> Result<()>;

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()>;
}

/// Join a directory and an entry name with `/`
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last component of a remote path; `/` for the root
pub fn remote_base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { "." } else { "/" };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parent directory of a remote path
pub fn remote_parent(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        None => ".",
        Some(0) => "/",
        Some(index) => &trimmed[..index],
    }
}

/// Check that a name reported by a directory listing is a single path component
///
/// NIST 800-53: SI-10 (Input Validation)
/// STIG: V-222396
/// Implementation: Entry names come from the remote host and are joined onto
/// local staging paths, so separators and dot components are refused
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidPath(format!("unsafe entry name {name:?}")));
    }
    Ok(())
}

/// Render a POSIX mode the way `ls -l` does
pub fn permission_string(mode: u32) -> String {
    const S_IFMT: u32 = 0o170_000;
    const S_IFDIR: u32 = 0o040_000;
    const S_IFLNK: u32 = 0o120_000;

    let mut rendered = String::with_capacity(10);
    rendered.push(match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        _ => '-',
    });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        rendered.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        rendered.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        rendered.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/srv", "a.txt"), "/srv/a.txt");
        assert_eq!(join_remote("/", "etc"), "/etc");
        assert_eq!(join_remote(".", "upload.bin"), "./upload.bin");
    }

    #[test]
    fn test_base_and_parent() {
        assert_eq!(remote_base_name("/home/alice/logs"), "logs");
        assert_eq!(remote_base_name("/home/alice/logs/"), "logs");
        assert_eq!(remote_base_name("/"), "/");
        assert_eq!(remote_parent("/home/alice/logs"), "/home/alice");
        assert_eq!(remote_parent("/logs"), "/");
        assert_eq!(remote_parent("logs"), ".");
    }

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("report.csv").is_ok());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("../etc/passwd").is_err());
        assert!(validate_entry_name("").is_err());
    }

    #[test]
    fn test_permission_string() {
        assert_eq!(permission_string(0o040_755), "drwxr-xr-x");
        assert_eq!(permission_string(0o100_644), "-rw-r--r--");
        assert_eq!(permission_string(0o120_777), "lrwxrwxrwx");
    }
}
