//! Shared test doubles: a local-directory `RemoteFs`, an in-memory shell and
//! channel-backed client transports.

#![allow(dead_code)]

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use shellport_ssh::error::{Error, FileError, Result};
use shellport_ssh::remote_fs::{EntryKind, RemoteFileEntry, join_remote, permission_string, remote_base_name};
use shellport_ssh::shell::{PtyControl, ShellStreams};
use shellport_ssh::{MessageSink, MessageSource, PtyGeometry, Release, RemoteFs, ShellSession};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// `RemoteFs` over a local directory; remote `/a/b` maps to `<root>/a/b`
pub struct LocalFs {
    root: PathBuf,
    /// Remote paths whose `open` fails with permission denied
    deny_open: Mutex<Vec<String>>,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            deny_open: Mutex::new(Vec::new()),
        }
    }

    pub fn deny_open(&self, path: &str) {
        self.deny_open.lock().unwrap().push(path.to_string());
    }

    fn local(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

fn map_io(err: std::io::Error, path: &str) -> Error {
    let path = path.to_string();
    match err.kind() {
        ErrorKind::NotFound => FileError::NotFound(path).into(),
        ErrorKind::PermissionDenied => FileError::PermissionDenied(path).into(),
        ErrorKind::AlreadyExists => FileError::AlreadyExists(path).into(),
        ErrorKind::DirectoryNotEmpty => FileError::NotEmpty(path).into(),
        ErrorKind::NotADirectory => FileError::NotADirectory(path).into(),
        _ => FileError::Failure {
            path,
            message: err.to_string(),
        }
        .into(),
    }
}

fn to_entry(name: String, path: String, metadata: &std::fs::Metadata) -> RemoteFileEntry {
    use std::os::unix::fs::PermissionsExt;
    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default();
    RemoteFileEntry {
        name,
        path,
        size: metadata.len(),
        kind: if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        },
        modified_at,
        permissions: permission_string(metadata.permissions().mode()),
    }
}

#[async_trait]
impl RemoteFs for LocalFs {
    type Reader = tokio::fs::File;
    type Writer = tokio::fs::File;

    async fn list(&self, path: &str) -> Result<Vec<RemoteFileEntry>> {
        let mut dir = tokio::fs::read_dir(self.local(path))
            .await
            .map_err(|e| map_io(e, path))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| map_io(e, path))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = entry.metadata().await.map_err(|e| map_io(e, path))?;
            let full_path = join_remote(path, &name);
            entries.push(to_entry(name, full_path, &metadata));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<RemoteFileEntry> {
        let metadata = tokio::fs::metadata(self.local(path))
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(to_entry(
            remote_base_name(path).to_string(),
            path.to_string(),
            &metadata,
        ))
    }

    async fn open(&self, path: &str) -> Result<tokio::fs::File> {
        if self.deny_open.lock().unwrap().iter().any(|denied| denied == path) {
            return Err(FileError::PermissionDenied(path.to_string()).into());
        }
        tokio::fs::File::open(self.local(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn create(&self, path: &str) -> Result<tokio::fs::File> {
        tokio::fs::File::create(self.local(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(self.local(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn remove_directory(&self, path: &str) -> Result<()> {
        tokio::fs::remove_dir(self.local(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        if self.local(new_path).exists() {
            return Err(FileError::AlreadyExists(new_path.to_string()).into());
        }
        tokio::fs::rename(self.local(old_path), self.local(new_path))
            .await
            .map_err(|e| map_io(e, old_path))
    }
}

/// Write a file below `root`, creating parents
pub fn write_tree_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Connection double counting releases
pub struct FakeConnection {
    pub releases: Arc<AtomicUsize>,
}

#[async_trait]
impl Release for FakeConnection {
    async fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct RecordingPty {
    resizes: Arc<Mutex<Vec<PtyGeometry>>>,
}

#[async_trait]
impl PtyControl for RecordingPty {
    async fn resize(&mut self, geometry: PtyGeometry) -> Result<()> {
        self.resizes.lock().unwrap().push(geometry);
        Ok(())
    }
}

/// Shell double backed by in-memory pipes
pub struct FakeShell {
    streams: Option<ShellStreams>,
    releases: Arc<AtomicUsize>,
}

impl ShellSession for FakeShell {
    fn take_streams(&mut self) -> Option<ShellStreams> {
        self.streams.take()
    }
}

#[async_trait]
impl Release for FakeShell {
    async fn release(&mut self) -> Result<()> {
        self.streams = None;
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The remote ends of a [`FakeShell`]
pub struct ShellEnds {
    /// Reads what the bridge wrote to stdin
    pub stdin: DuplexStream,
    /// Writes become shell stdout
    pub stdout: DuplexStream,
    /// Writes become shell stderr
    pub stderr: DuplexStream,
    pub resizes: Arc<Mutex<Vec<PtyGeometry>>>,
    pub shell_releases: Arc<AtomicUsize>,
    pub connection_releases: Arc<AtomicUsize>,
}

pub fn fake_session() -> (FakeConnection, FakeShell, ShellEnds) {
    let (stdin_local, stdin_remote) = tokio::io::duplex(4096);
    let (stdout_local, stdout_remote) = tokio::io::duplex(4096);
    let (stderr_local, stderr_remote) = tokio::io::duplex(4096);
    let resizes = Arc::new(Mutex::new(Vec::new()));
    let shell_releases = Arc::new(AtomicUsize::new(0));
    let connection_releases = Arc::new(AtomicUsize::new(0));

    let shell = FakeShell {
        streams: Some(ShellStreams {
            stdin: Box::pin(stdin_local),
            stdout: Box::pin(stdout_local),
            stderr: Box::pin(stderr_local),
            pty: Box::new(RecordingPty {
                resizes: Arc::clone(&resizes),
            }),
        }),
        releases: Arc::clone(&shell_releases),
    };
    let connection = FakeConnection {
        releases: Arc::clone(&connection_releases),
    };
    let ends = ShellEnds {
        stdin: stdin_remote,
        stdout: stdout_remote,
        stderr: stderr_remote,
        resizes,
        shell_releases,
        connection_releases,
    };
    (connection, shell, ends)
}

/// Client transport fed from a channel
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<Bytes>>,
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<Bytes>> {
        self.rx.recv().await
    }
}

/// Client transport recording every message sent to it
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
    closes: Arc<AtomicUsize>,
    close_reasons: Arc<Mutex<Vec<String>>>,
    fail_sends: bool,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Transport("client went away".to_string()));
        }
        self.tx
            .send(payload)
            .map_err(|_| Error::Transport("receiver dropped".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close_with_reason(&mut self, reason: &str) -> Result<()> {
        self.close_reasons.lock().unwrap().push(reason.to_string());
        self.close().await
    }
}

/// Client transport that accepts output but never finishes closing
pub struct StalledSink;

#[async_trait]
impl MessageSink for StalledSink {
    async fn send(&mut self, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        std::future::pending().await
    }
}

pub struct ClientEnds {
    /// Messages to the bridge; drop to close the client side
    pub to_bridge: mpsc::UnboundedSender<Result<Bytes>>,
    /// Messages the bridge sent
    pub from_bridge: mpsc::UnboundedReceiver<Bytes>,
    pub sink_closes: Arc<AtomicUsize>,
    /// Reasons given when the bridge closed the transport
    pub close_reasons: Arc<Mutex<Vec<String>>>,
}

pub fn client_transport(fail_sends: bool) -> (ChannelSource, ChannelSink, ClientEnds) {
    let (to_bridge, rx) = mpsc::unbounded_channel();
    let (tx, from_bridge) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    let close_reasons = Arc::new(Mutex::new(Vec::new()));
    (
        ChannelSource { rx },
        ChannelSink {
            tx,
            closes: Arc::clone(&closes),
            close_reasons: Arc::clone(&close_reasons),
            fail_sends,
        },
        ClientEnds {
            to_bridge,
            from_bridge,
            sink_closes: closes,
            close_reasons,
        },
    )
}
