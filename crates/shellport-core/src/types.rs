use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::{Result, ShellportError};

/// A registered remote host and the credential used to reach it.
#[derive(Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub description: Option<String>,
    /// SHA-256 fingerprint (`SHA256:...`) pinned for this host, if any.
    pub host_key_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostRecord {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            address: address.into(),
            port,
            username: username.into(),
            password: password.into(),
            description: None,
            host_key_fingerprint: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl std::fmt::Debug for HostRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .finish()
    }
}

/// TLS configuration for HTTPS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Enable TLS/HTTPS
    pub enabled: bool,
    /// Path to TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// How server host keys are checked when no fingerprint is pinned on the host record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyCheck {
    /// Look the key up in `known_hosts_path`.
    KnownHosts,
    /// Accept every host key. Logged on every connection.
    AcceptAny,
    /// Only hosts with a pinned fingerprint may connect.
    Pinned,
}

/// Outbound SSH client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Deadline for TCP connect, handshake and authentication together
    pub connect_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub inactivity_timeout_secs: Option<u64>,
    pub host_key_policy: HostKeyCheck,
    pub known_hosts_path: PathBuf,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_interval_secs: 30,
            inactivity_timeout_secs: None,
            host_key_policy: HostKeyCheck::KnownHosts,
            known_hosts_path: PathBuf::from("/etc/shellport/known_hosts"),
        }
    }
}

/// WebSocket frame kind used for shell output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFrame {
    Text,
    Binary,
}

/// Interactive terminal settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSettings {
    pub term: String,
    pub rows: u32,
    pub cols: u32,
    /// Size of the buffer each output direction reads into
    pub read_buffer_size: usize,
    pub output_frame: OutputFrame,
    /// Origins allowed to open a terminal; `"*"` allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            rows: 40,
            cols: 200,
            read_buffer_size: 1024,
            output_frame: OutputFrame::Text,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Directory download / compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Parent directory for staging areas; system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    pub archive_extension: String,
    /// Largest accepted multipart upload body
    pub max_upload_bytes: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            staging_dir: None,
            archive_extension: "zip".to_string(),
            max_upload_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for log aggregators
    Json,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub https_port: Option<u16>,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub terminal: TerminalSettings,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            https_port: Some(8443),
            database_url: default_database_url(),
            tls: None, // TLS disabled by default
            ssh: SshSettings::default(),
            terminal: TerminalSettings::default(),
            transfer: TransferSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.ssh.connect_timeout_secs == 0 {
            return Err(ShellportError::InvalidConfig(
                "ssh.connect_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.terminal.rows == 0 || self.terminal.cols == 0 {
            return Err(ShellportError::InvalidConfig(format!(
                "terminal geometry must be positive, got {}x{}",
                self.terminal.cols, self.terminal.rows
            )));
        }

        if self.terminal.read_buffer_size == 0 {
            return Err(ShellportError::InvalidConfig(
                "terminal.read_buffer_size must be greater than zero".to_string(),
            ));
        }

        if self.terminal.allowed_origins.is_empty() {
            return Err(ShellportError::InvalidConfig(
                "terminal.allowed_origins must not be empty (use \"*\" to allow any origin)"
                    .to_string(),
            ));
        }

        let extension = &self.transfer.archive_extension;
        if extension.is_empty() || extension.contains(['/', '.']) {
            return Err(ShellportError::InvalidConfig(format!(
                "transfer.archive_extension must be a bare extension, got {:?}",
                extension
            )));
        }

        if self.transfer.max_upload_bytes == 0 {
            return Err(ShellportError::InvalidConfig(
                "transfer.max_upload_bytes must be greater than zero".to_string(),
            ));
        }

        if let Some(tls) = &self.tls {
            if tls.enabled && (tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty()) {
                return Err(ShellportError::InvalidConfig(
                    "tls.cert_path and tls.key_path are required when TLS is enabled".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    8080
}

fn default_database_url() -> String {
    "/var/lib/shellport/hosts.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str("http_port = 9000\n").unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.terminal.rows, 40);
        assert_eq!(config.terminal.cols, 200);
        assert_eq!(config.ssh.host_key_policy, HostKeyCheck::KnownHosts);
        assert_eq!(config.terminal.allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_policy_and_frame_parse_from_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            [ssh]
            host_key_policy = "accept-any"

            [terminal]
            output_frame = "binary"
            allowed_origins = ["https://ops.example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.ssh.host_key_policy, HostKeyCheck::AcceptAny);
        assert_eq!(config.terminal.output_frame, OutputFrame::Binary);
    }

    #[test]
    fn test_validate_rejects_zero_geometry() {
        let mut config = ServerConfig::default();
        config.terminal.rows = 0;
        assert!(matches!(
            config.validate(),
            Err(ShellportError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_origin_list() {
        let mut config = ServerConfig::default();
        config.terminal.allowed_origins.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dotted_extension() {
        let mut config = ServerConfig::default();
        config.transfer.archive_extension = ".zip".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_record_debug_hides_password() {
        let host = HostRecord::new(1, "web", "10.0.0.1", 22, "root", "hunter2");
        let rendered = format!("{:?}", host);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
