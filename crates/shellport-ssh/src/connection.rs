//! Outbound SSH connections
//!
//! NIST 800-53: IA-2 (Identification and Authentication), SC-8 (Transmission Confidentiality)
//! Implementation: One authenticated SSH connection per shell session or file
//! request, bounded by a connect deadline and checked against a host key policy

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, AuthResult, Handle};
use russh::keys::ssh_key::PublicKey;
use russh::{Disconnect, Pty};
use tracing::{debug, info, warn};

use crate::control::PtyGeometry;
use crate::error::{ConnectionError, ConnectionFailure, Result};
use crate::lifecycle::Release;
use crate::sftp::SftpChannel;
use crate::shell::RemoteShell;
use crate::trust::HostKeyPolicy;

/// Address and password credential for one remote host
#[derive(Clone)]
pub struct ConnectionCredential {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
}

impl ConnectionCredential {
    pub fn new(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// `address:port` as dialled
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl fmt::Debug for ConnectionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCredential")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Client-side connection settings
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Deadline covering TCP connect, handshake and authentication
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub host_key_policy: HostKeyPolicy,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Some(Duration::from_secs(30)),
            inactivity_timeout: None,
            host_key_policy: HostKeyPolicy::RejectAll,
        }
    }
}

/// russh client handler enforcing the host key policy
pub struct ClientHandler {
    policy: HostKeyPolicy,
    host: String,
    port: u16,
    rejection: Arc<Mutex<Option<String>>>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.policy.verify(&self.host, self.port, server_public_key) {
            Ok(()) => Ok(true),
            Err(reason) => {
                warn!(
                    event = "host_key_rejected",
                    host = %self.host,
                    port = self.port,
                    reason = %reason,
                    "Server host key rejected"
                );
                if let Ok(mut slot) = self.rejection.lock() {
                    *slot = Some(reason);
                }
                Ok(false)
            }
        }
    }
}

/// An authenticated SSH connection
///
/// Dropping an open connection schedules a disconnect on the current runtime.
pub struct SshConnection {
    handle: Option<Handle<ClientHandler>>,
    target: String,
}

impl SshConnection {
    /// Connect and authenticate with a password
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] classified as network, authentication,
    /// timeout or host key rejection.
    ///
    /// # NIST 800-53: IA-2, AC-12 (Session Termination)
    pub async fn connect(
        credential: &ConnectionCredential,
        options: &ConnectOptions,
    ) -> std::result::Result<Self, ConnectionError> {
        let target = credential.target();
        let rejection = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            policy: options.host_key_policy.clone(),
            host: credential.address.clone(),
            port: credential.port,
            rejection: Arc::clone(&rejection),
        };
        let config = Arc::new(client::Config {
            keepalive_interval: options.keepalive_interval,
            inactivity_timeout: options.inactivity_timeout,
            ..Default::default()
        });

        debug!(remote = %target, username = %credential.username, "Connecting");

        let attempt = async {
            let mut handle = client::connect(
                config,
                (credential.address.as_str(), credential.port),
                handler,
            )
            .await
            .map_err(|e| {
                let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
                match rejected {
                    Some(reason) => {
                        ConnectionError::new(ConnectionFailure::HostKeyRejected, &target, reason)
                    }
                    None => ConnectionError::new(ConnectionFailure::Network, &target, e.to_string()),
                }
            })?;

            let auth = handle
                .authenticate_password(&credential.username, &credential.secret)
                .await
                .map_err(|e| ConnectionError::new(ConnectionFailure::Network, &target, e.to_string()))?;

            match auth {
                AuthResult::Success => Ok(handle),
                AuthResult::Failure { .. } => Err(ConnectionError::new(
                    ConnectionFailure::Auth,
                    &target,
                    format!("password rejected for user {}", credential.username),
                )),
            }
        };

        match tokio::time::timeout(options.connect_timeout, attempt).await {
            Ok(Ok(handle)) => {
                info!(
                    event = "ssh_connected",
                    remote = %target,
                    username = %credential.username,
                    "SSH connection established"
                );
                Ok(Self {
                    handle: Some(handle),
                    target,
                })
            }
            Ok(Err(e)) => {
                warn!(
                    event = "ssh_connect_failed",
                    remote = %target,
                    reason = %e.reason,
                    error = %e.message,
                    "SSH connection failed"
                );
                Err(e)
            }
            Err(_) => {
                warn!(
                    event = "ssh_connect_failed",
                    remote = %target,
                    reason = %ConnectionFailure::Timeout,
                    "SSH connection timed out"
                );
                Err(ConnectionError::new(
                    ConnectionFailure::Timeout,
                    &target,
                    format!("no session within {:?}", options.connect_timeout),
                ))
            }
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn handle(&self) -> Result<&Handle<ClientHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| crate::Error::ChannelClosed(format!("connection to {} closed", self.target)))
    }

    /// Open the SFTP subsystem on a new session channel
    pub async fn open_sftp(&self) -> Result<SftpChannel> {
        let channel = self.handle()?.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        SftpChannel::start(channel).await
    }

    /// Request a PTY and start the login shell on a new session channel
    pub async fn open_shell(&self, term: &str, geometry: PtyGeometry) -> Result<RemoteShell> {
        let channel = self.handle()?.channel_open_session().await?;
        let modes = [
            (Pty::ECHO, 1),
            (Pty::TTY_OP_ISPEED, 14_400),
            (Pty::TTY_OP_OSPEED, 14_400),
        ];
        channel
            .request_pty(true, term, geometry.cols, geometry.rows, 0, 0, &modes)
            .await?;
        channel.request_shell(true).await?;
        debug!(remote = %self.target, rows = geometry.rows, cols = geometry.cols, "Shell started");
        Ok(RemoteShell::start(channel))
    }

    /// Disconnect; a second call is a no-op
    pub async fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        debug!(remote = %self.target, "SSH connection closed");
        Ok(())
    }
}

#[async_trait]
impl Release for SshConnection {
    async fn release(&mut self) -> Result<()> {
        self.close().await
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let target = self.target.clone();
            runtime.spawn(async move {
                if let Err(e) = handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    debug!(remote = %target, error = %e, "Disconnect on drop failed");
                }
            });
        }
    }
}

/// SFTP channel bundled with the connection that carries it
///
/// Field order matters: the channel is dropped before the connection.
pub struct FileSession {
    sftp: SftpChannel,
    connection: SshConnection,
}

impl FileSession {
    /// Connect, authenticate and start SFTP
    pub async fn open(credential: &ConnectionCredential, options: &ConnectOptions) -> Result<Self> {
        let mut connection = SshConnection::connect(credential, options).await?;
        match connection.open_sftp().await {
            Ok(sftp) => Ok(Self { sftp, connection }),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Close after SFTP start failure failed");
                }
                Err(e)
            }
        }
    }

    pub fn sftp(&self) -> &SftpChannel {
        &self.sftp
    }

    /// Close the connection; errors are logged, never returned
    pub async fn close(self) {
        let Self { sftp, mut connection } = self;
        drop(sftp);
        if let Err(e) = connection.close().await {
            debug!(remote = %connection.target(), error = %e, "SSH disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_hides_secret() {
        let credential = ConnectionCredential::new("10.0.0.5", 22, "deploy", "s3cret");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("s3cret"));
        assert_eq!(credential.target(), "10.0.0.5:22");
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_failure() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let credential = ConnectionCredential::new("127.0.0.1", port, "nobody", "x");
        let options = ConnectOptions {
            connect_timeout: Duration::from_secs(5),
            ..ConnectOptions::default()
        };
        let err = SshConnection::connect(&credential, &options)
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason, ConnectionFailure::Network);
        assert_eq!(err.target, format!("127.0.0.1:{port}"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        // Accepts TCP but never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let credential = ConnectionCredential::new("127.0.0.1", port, "nobody", "x");
        let options = ConnectOptions {
            connect_timeout: Duration::from_millis(200),
            ..ConnectOptions::default()
        };
        let err = SshConnection::connect(&credential, &options)
            .await
            .err()
            .unwrap();
        assert_eq!(err.reason, ConnectionFailure::Timeout);
        server.abort();
    }
}
