//! Zip archiving of a local directory tree
//!
//! Entry names are the forward-slash relative paths of regular files under
//! the root, with no leading component for the root itself. File contents
//! are streamed into the archive, never buffered whole.

use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::{Component, Path, PathBuf};

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

/// One file inside an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub relative_path: String,
    pub content: Vec<u8>,
}

/// Totals of a written archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Uncompressed bytes
    pub bytes: u64,
    /// Size of the archive file
    pub archive_size: u64,
}

/// Archive every regular file under `root` into `output`
///
/// `output` must not lie inside `root`.
pub fn build_archive(root: &Path, output: &Path) -> Result<ArchiveSummary> {
    if output.starts_with(root) {
        return Err(Error::InvalidPath(format!(
            "archive {} would be written inside {}",
            output.display(),
            root.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(root, &mut files)?;

    let mut writer = ZipWriter::new(BufWriter::new(File::create(output)?));
    let mut summary = ArchiveSummary::default();

    for path in files {
        let name = relative_entry_name(root, &path)?;
        let mut source = File::open(&path)?;
        let size = source.metadata()?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644)
            .large_file(size >= u64::from(u32::MAX));

        writer.start_file(name, options)?;
        summary.bytes += io::copy(&mut source, &mut writer)?;
        summary.entries += 1;
    }

    let mut inner = writer.finish()?;
    io::Write::flush(&mut inner)?;
    drop(inner);
    summary.archive_size = std::fs::metadata(output)?.len();

    info!(
        event = "archive_built",
        archive = %output.display(),
        entries = summary.entries,
        bytes = summary.bytes,
        archive_size = summary.archive_size,
        "Archive written"
    );
    Ok(summary)
}

/// Async wrapper running [`build_archive`] on the blocking pool
pub async fn build(root: PathBuf, output: PathBuf) -> Result<ArchiveSummary> {
    tokio::task::spawn_blocking(move || build_archive(&root, &output))
        .await
        .map_err(|e| Error::Archive(format!("archive task failed: {e}")))?
}

/// Read every file entry of an archive
pub fn read_entries(archive: &Path) -> Result<Vec<ArchiveEntry>> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut file = zip.by_index(index)?;
        if file.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        entries.push(ArchiveEntry {
            relative_path: file.name().to_string(),
            content,
        });
    }
    Ok(entries)
}

/// Forward-slash path of `path` relative to `root`
pub fn relative_entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        Error::InvalidPath(format!("{} is not under {}", path.display(), root.display()))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            _ => {
                return Err(Error::InvalidPath(format!(
                    "unexpected component in {}",
                    relative.display()
                )));
            }
        }
    }
    if parts.is_empty() {
        return Err(Error::InvalidPath(format!("{} is the archive root", path.display())));
    }
    Ok(parts.join("/"))
}

/// Regular files under `dir`, depth first, in name order
fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}
