//! Server host key trust
//!
//! NIST 800-53: IA-3 (Device Identification and Authentication), SC-23 (Session Authenticity)
//! Implementation: Every outbound connection verifies the server key against an
//! explicit policy before the credential is sent

use std::path::PathBuf;

use russh::keys::ssh_key::{HashAlg, PublicKey};
use tracing::warn;

/// How a server's host key is judged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust any key. Every acceptance is logged.
    AcceptAny,
    /// Trust exactly one SHA-256 fingerprint (`SHA256:<base64>`)
    PinnedFingerprint(String),
    /// Trust keys listed in an OpenSSH `known_hosts` file
    KnownHostsList(PathBuf),
    /// Trust nothing
    RejectAll,
}

impl HostKeyPolicy {
    /// Verify `key` presented by `host:port`
    ///
    /// Returns the reason for rejection on failure.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), String> {
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        match self {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    event = "host_key_accepted_unverified",
                    host = %host,
                    port = port,
                    fingerprint = %fingerprint,
                    "Accepting unverified host key"
                );
                Ok(())
            }
            HostKeyPolicy::PinnedFingerprint(expected) => {
                if fingerprints_match(expected, &fingerprint) {
                    Ok(())
                } else {
                    Err(format!(
                        "host key {fingerprint} does not match pinned fingerprint {expected}"
                    ))
                }
            }
            HostKeyPolicy::KnownHostsList(path) => {
                match russh::keys::check_known_hosts_path(host, port, key, path) {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(format!(
                        "host key {fingerprint} for {host}:{port} is not listed in {}",
                        path.display()
                    )),
                    Err(e) => Err(format!("known_hosts check failed: {e}")),
                }
            }
            HostKeyPolicy::RejectAll => Err(format!(
                "no trusted key configured for {host}:{port} (presented {fingerprint})"
            )),
        }
    }
}

/// Compare fingerprints ignoring the `SHA256:` prefix and base64 padding
pub fn fingerprints_match(expected: &str, actual: &str) -> bool {
    fn normalize(fingerprint: &str) -> &str {
        let fingerprint = fingerprint.trim();
        fingerprint
            .strip_prefix("SHA256:")
            .unwrap_or(fingerprint)
            .trim_end_matches('=')
    }
    let expected = normalize(expected);
    !expected.is_empty() && expected == normalize(actual)
}
