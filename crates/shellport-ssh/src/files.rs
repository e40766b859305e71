//! Remote file operations exposed over HTTP
//!
//! Every function works on any [`RemoteFs`]; connections are opened and
//! closed by the caller.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tracing::info;

use crate::archive;
use crate::error::{Error, FileError, Result};
use crate::mirror;
use crate::remote_fs::{
    EntryKind, RemoteFileEntry, RemoteFs, join_remote, remote_base_name, remote_parent,
};

/// Where directory archives are staged
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Parent of per-request staging directories; system temp dir when `None`
    pub parent: Option<PathBuf>,
    /// Archive file extension without the dot
    pub archive_extension: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            parent: None,
            archive_extension: "zip".to_string(),
        }
    }
}

impl StagingConfig {
    /// Create a fresh staging directory, removed when dropped
    pub fn create(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("shellport-");
        let staging = match &self.parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(staging)
    }

    fn archive_name(&self, directory: &str) -> String {
        format!("{}.{}", remote_base_name(directory), self.archive_extension)
    }
}

/// A remote file opened for download
pub struct RemoteDownload<R> {
    pub file_name: String,
    pub size: u64,
    pub reader: R,
}

/// A staged directory archive opened for download
///
/// The staging directory is removed when this is dropped.
pub struct ArchiveDownload {
    pub file_name: String,
    pub size: u64,
    file: tokio::fs::File,
    _staging: TempDir,
}

impl AsyncRead for ArchiveDownload {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// List a remote directory
pub async fn list_directory<F: RemoteFs>(fs: &F, path: &str) -> Result<Vec<RemoteFileEntry>> {
    fs.list(path).await
}

/// Reduce a client-supplied upload name to one safe path component
///
/// NIST 800-53: SI-10 (Input Validation)
/// STIG: V-222396
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(Error::InvalidPath(format!("unusable file name {name:?}")));
    }
    Ok(base.to_string())
}

/// Write `content` to `<directory>/<file_name>` on the remote host
///
/// Returns the remote path and the number of bytes written.
pub async fn upload_file<F, R>(
    fs: &F,
    directory: &str,
    file_name: &str,
    content: &mut R,
) -> Result<(String, u64)>
where
    F: RemoteFs,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let name = sanitize_file_name(file_name)?;
    let remote_path = join_remote(directory, &name);

    let mut writer = fs.create(&remote_path).await?;
    let bytes = tokio::io::copy(content, &mut writer).await?;
    writer.shutdown().await?;

    info!(event = "file_uploaded", remote_path = %remote_path, bytes, "File uploaded");
    Ok((remote_path, bytes))
}

/// Open a remote regular file for streaming
pub async fn download_file<F: RemoteFs>(fs: &F, path: &str) -> Result<RemoteDownload<F::Reader>> {
    let entry = fs.stat(path).await?;
    if entry.is_dir() {
        return Err(FileError::IsADirectory(path.to_string()).into());
    }
    let reader = fs.open(path).await?;
    Ok(RemoteDownload {
        file_name: entry.name,
        size: entry.size,
        reader,
    })
}

/// Mirror a remote directory and archive it in a staging area
async fn stage_directory_archive<F: RemoteFs>(
    fs: &F,
    path: &str,
    staging: &StagingConfig,
) -> Result<(TempDir, PathBuf, String)> {
    if remote_base_name(path) == "/" {
        return Err(Error::InvalidPath("cannot archive the root directory".to_string()));
    }
    let entry = fs.stat(path).await?;
    if !entry.is_dir() {
        return Err(FileError::NotADirectory(path.to_string()).into());
    }

    let area = staging.create()?;
    let tree = area.path().join("tree");
    mirror::mirror(fs, path, &tree).await?;

    let archive_name = staging.archive_name(path);
    let archive_path = area.path().join(&archive_name);
    archive::build(tree, archive_path.clone()).await?;
    Ok((area, archive_path, archive_name))
}

/// Mirror a remote directory, archive it and open the archive for streaming
pub async fn download_directory_archive<F: RemoteFs>(
    fs: &F,
    path: &str,
    staging: &StagingConfig,
) -> Result<ArchiveDownload> {
    let (area, archive_path, file_name) = stage_directory_archive(fs, path, staging).await?;
    let file = tokio::fs::File::open(&archive_path).await?;
    let size = file.metadata().await?.len();
    Ok(ArchiveDownload {
        file_name,
        size,
        file,
        _staging: area,
    })
}

/// Archive a remote directory and upload the archive next to it
///
/// Returns the remote path of the archive.
pub async fn compress_directory_in_place<F: RemoteFs>(
    fs: &F,
    path: &str,
    staging: &StagingConfig,
) -> Result<String> {
    let (_area, archive_path, archive_name) = stage_directory_archive(fs, path, staging).await?;

    let remote_path = join_remote(remote_parent(path), &archive_name);
    let mut local = tokio::fs::File::open(&archive_path).await?;
    let mut writer = fs.create(&remote_path).await?;
    let bytes = tokio::io::copy(&mut local, &mut writer).await?;
    writer.shutdown().await?;

    info!(
        event = "directory_compressed",
        remote_path = %path,
        archive = %remote_path,
        bytes,
        "Directory archived in place"
    );
    Ok(remote_path)
}

/// Delete a file or an empty directory
///
/// Non-empty directories are refused with [`FileError::NotEmpty`].
pub async fn delete_entry<F: RemoteFs>(fs: &F, path: &str) -> Result<EntryKind> {
    let entry = fs.stat(path).await?;
    match entry.kind {
        EntryKind::Directory => fs.remove_directory(path).await?,
        EntryKind::File => fs.remove(path).await?,
    }
    info!(event = "entry_deleted", remote_path = %path, kind = ?entry.kind, "Remote entry deleted");
    Ok(entry.kind)
}

/// Rename an entry; an existing destination is never overwritten
pub async fn rename_entry<F: RemoteFs>(fs: &F, old_path: &str, new_path: &str) -> Result<()> {
    if old_path.is_empty() || new_path.is_empty() {
        return Err(Error::InvalidPath("rename requires both paths".to_string()));
    }
    match fs.stat(new_path).await {
        Ok(_) => return Err(FileError::AlreadyExists(new_path.to_string()).into()),
        Err(Error::File(FileError::NotFound(_))) => {}
        Err(e) => return Err(e),
    }
    fs.rename(old_path, new_path).await?;
    info!(event = "entry_renamed", old_path = %old_path, new_path = %new_path, "Remote entry renamed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd").unwrap(), "passwd");
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name("dir/").is_err());
    }

    #[test]
    fn test_archive_name_uses_base_name() {
        let staging = StagingConfig::default();
        assert_eq!(staging.archive_name("/home/alice/logs"), "logs.zip");
        assert_eq!(staging.archive_name("/home/alice/logs/"), "logs.zip");
    }
}
