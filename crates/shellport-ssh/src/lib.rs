//! # Shellport SSH
//!
//! Outbound SSH client side of the Shellport gateway.
//!
//! This crate implements:
//! - Password-authenticated connections with host key verification (RFC 4252, RFC 4253)
//! - Interactive shells over a PTY bridged to a message transport (RFC 4254)
//! - Remote file operations over SFTP (draft-ietf-secsh-filexfer-02)
//! - Recursive directory mirroring and zip archiving
//!
//! ## Terminal bridge
//!
//! [`TerminalBridge`] relays client messages to the shell's stdin and the
//! shell's stdout and stderr back to the client. Resize requests travel
//! in-band as `ESC [ 8 ; rows ; cols t`.

pub mod archive;
pub mod bridge;
pub mod connection;
pub mod control;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod mirror;
pub mod remote_fs;
pub mod sftp;
pub mod shell;
pub mod transport;
pub mod trust;

pub use bridge::{BridgeOutcome, BridgeState, Direction, TerminalBridge, TerminalOptions};
pub use connection::{ConnectOptions, ConnectionCredential, FileSession, SshConnection};
pub use control::PtyGeometry;
pub use error::{ConnectionError, ConnectionFailure, Error, FileError, Result, TransferError};
pub use files::StagingConfig;
pub use lifecycle::{Release, SessionLifecycle};
pub use mirror::{TransferReport, TransferTask};
pub use remote_fs::{EntryKind, RemoteFileEntry, RemoteFs};
pub use sftp::SftpChannel;
pub use shell::{PtyControl, RemoteShell, ShellSession, ShellStreams};
pub use transport::{MessageSink, MessageSource};
pub use trust::HostKeyPolicy;
