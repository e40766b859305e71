//! Translate host records and server settings into SSH client options

use std::time::Duration;

use shellport_core::{HostKeyCheck, HostRecord, SshSettings, TerminalSettings, TransferSettings};
use shellport_ssh::{
    ConnectOptions, ConnectionCredential, HostKeyPolicy, PtyGeometry, StagingConfig,
    TerminalOptions,
};

pub fn credential_for(host: &HostRecord) -> ConnectionCredential {
    ConnectionCredential::new(&host.address, host.port, &host.username, &host.password)
}

/// Host key policy for one host
///
/// A fingerprint pinned on the host record wins over the configured check.
/// Under [`HostKeyCheck::Pinned`] a host without a fingerprint is refused.
pub fn host_key_policy(host: &HostRecord, ssh: &SshSettings) -> HostKeyPolicy {
    if let Some(fingerprint) = host
        .host_key_fingerprint
        .as_deref()
        .filter(|fingerprint| !fingerprint.trim().is_empty())
    {
        return HostKeyPolicy::PinnedFingerprint(fingerprint.trim().to_string());
    }
    match ssh.host_key_policy {
        HostKeyCheck::KnownHosts => HostKeyPolicy::KnownHostsList(ssh.known_hosts_path.clone()),
        HostKeyCheck::AcceptAny => HostKeyPolicy::AcceptAny,
        HostKeyCheck::Pinned => HostKeyPolicy::RejectAll,
    }
}

pub fn connect_options(host: &HostRecord, ssh: &SshSettings) -> ConnectOptions {
    ConnectOptions {
        connect_timeout: Duration::from_secs(ssh.connect_timeout_secs),
        keepalive_interval: (ssh.keepalive_interval_secs > 0)
            .then(|| Duration::from_secs(ssh.keepalive_interval_secs)),
        inactivity_timeout: ssh.inactivity_timeout_secs.map(Duration::from_secs),
        host_key_policy: host_key_policy(host, ssh),
    }
}

pub fn terminal_options(terminal: &TerminalSettings) -> TerminalOptions {
    TerminalOptions {
        term: terminal.term.clone(),
        geometry: PtyGeometry::new(terminal.rows, terminal.cols),
        read_buffer_size: terminal.read_buffer_size,
        ..TerminalOptions::default()
    }
}

pub fn staging_config(transfer: &TransferSettings) -> StagingConfig {
    StagingConfig {
        parent: transfer.staging_dir.clone(),
        archive_extension: transfer.archive_extension.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn host() -> HostRecord {
        HostRecord::new(3, "db", "10.0.0.30", 2222, "ops", "pw")
    }

    #[test]
    fn test_pinned_fingerprint_overrides_configured_check() {
        let mut host = host();
        host.host_key_fingerprint = Some("SHA256:abc ".to_string());
        let ssh = SshSettings {
            host_key_policy: HostKeyCheck::AcceptAny,
            ..SshSettings::default()
        };
        assert_eq!(
            host_key_policy(&host, &ssh),
            HostKeyPolicy::PinnedFingerprint("SHA256:abc".to_string())
        );
    }

    #[test]
    fn test_pinned_mode_without_fingerprint_rejects() {
        let ssh = SshSettings {
            host_key_policy: HostKeyCheck::Pinned,
            ..SshSettings::default()
        };
        assert_eq!(host_key_policy(&host(), &ssh), HostKeyPolicy::RejectAll);
    }

    #[test]
    fn test_known_hosts_uses_configured_path() {
        let ssh = SshSettings {
            known_hosts_path: PathBuf::from("/srv/shellport/known_hosts"),
            ..SshSettings::default()
        };
        assert_eq!(
            host_key_policy(&host(), &ssh),
            HostKeyPolicy::KnownHostsList(PathBuf::from("/srv/shellport/known_hosts"))
        );
    }

    #[test]
    fn test_connect_options_from_settings() {
        let ssh = SshSettings {
            connect_timeout_secs: 3,
            keepalive_interval_secs: 0,
            inactivity_timeout_secs: Some(600),
            ..SshSettings::default()
        };
        let options = connect_options(&host(), &ssh);
        assert_eq!(options.connect_timeout, Duration::from_secs(3));
        assert_eq!(options.keepalive_interval, None);
        assert_eq!(options.inactivity_timeout, Some(Duration::from_secs(600)));

        let credential = credential_for(&host());
        assert_eq!(credential.target(), "10.0.0.30:2222");
    }

    #[test]
    fn test_terminal_options_from_settings() {
        let options = terminal_options(&TerminalSettings::default());
        assert_eq!(options.geometry, PtyGeometry::new(40, 200));
        assert_eq!(options.term, "xterm");
    }
}
