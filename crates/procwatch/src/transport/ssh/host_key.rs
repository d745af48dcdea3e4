//! Server host key checks against `known_hosts` or a pinned fingerprint.
//!
//! Only plain host entries are understood; hashed (`|1|...`) entries and
//! `@cert-authority`/`@revoked` markers are skipped.

use std::io::{self, Write};
use std::path::Path;

use russh::keys::{HashAlg, PublicKey};

use crate::remote::{DEFAULT_SSH_PORT, HostKeyPolicy};

/// Result of looking a host up in `known_hosts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Lookup {
    /// An entry for the host carries this key.
    Match,
    /// The host is listed, but only with other keys.
    Mismatch,
    /// The host is not listed.
    Unknown,
}

/// How the host is written in `known_hosts`: `host` on port 22,
/// `[host]:port` otherwise.
pub(super) fn host_pattern(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

/// Look `key` up for `host:port` in the contents of a `known_hosts` file.
pub(super) fn lookup(contents: &str, host: &str, port: u16, key: &PublicKey) -> Lookup {
    let pattern = host_pattern(host, port);
    let wanted = key.fingerprint(HashAlg::Sha256);
    let mut listed = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let (Some(hosts), Some(_key_type), Some(key_data)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };

        if !hosts.split(',').any(|h| h == pattern) {
            continue;
        }
        listed = true;

        match russh::keys::parse_public_key_base64(key_data) {
            Ok(stored) if stored.fingerprint(HashAlg::Sha256) == wanted => return Lookup::Match,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(host = %pattern, error = %err, "unparsable known_hosts key");
            }
        }
    }

    if listed { Lookup::Mismatch } else { Lookup::Unknown }
}

/// The `known_hosts` line for a key.
pub(super) fn entry(host: &str, port: u16, key: &PublicKey) -> io::Result<String> {
    let openssh = key.to_openssh().map_err(io::Error::other)?;
    let key_part = openssh.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
    Ok(format!("{} {key_part}", host_pattern(host, port)))
}

/// Append an entry for the key, creating the file and its directory.
pub(super) fn append(path: &Path, host: &str, port: u16, key: &PublicKey) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let line = entry(host, port, key)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

/// Whether the key's SHA-256 fingerprint equals `expected`, with or
/// without the `SHA256:` prefix.
pub(super) fn fingerprint_matches(expected: &str, key: &PublicKey) -> bool {
    let actual = key.fingerprint(HashAlg::Sha256).to_string();
    let expected = expected.trim();
    let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
    actual.strip_prefix("SHA256:").unwrap_or(&actual) == expected
}

/// Check a server key under `policy`. `Err` carries the rejection reason.
pub(super) fn verify(
    policy: &HostKeyPolicy,
    known_hosts: &Path,
    host: &str,
    port: u16,
    key: &PublicKey,
) -> Result<(), String> {
    if let HostKeyPolicy::Fingerprint(expected) = policy {
        return if fingerprint_matches(expected, key) {
            Ok(())
        } else {
            Err(format!(
                "server key {} does not match pinned fingerprint {expected}",
                key.fingerprint(HashAlg::Sha256)
            ))
        };
    }

    let contents = match std::fs::read_to_string(known_hosts) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(format!("cannot read {}: {err}", known_hosts.display())),
    };

    match (lookup(&contents, host, port, key), policy) {
        (Lookup::Match, _) => {
            tracing::debug!(host, port, "host key verified against known_hosts");
            Ok(())
        }
        (Lookup::Mismatch, _) => Err(format!(
            "server key {} differs from the key recorded in {}",
            key.fingerprint(HashAlg::Sha256),
            known_hosts.display()
        )),
        (Lookup::Unknown, HostKeyPolicy::AcceptNew) => {
            match append(known_hosts, host, port, key) {
                Ok(()) => {
                    let path = known_hosts.display();
                    tracing::info!(host, port, %path, "added host key to known_hosts");
                }
                Err(err) => {
                    tracing::warn!(
                        host,
                        port,
                        error = %err,
                        "accepted new host key but could not record it"
                    );
                }
            }
            Ok(())
        }
        (Lookup::Unknown, _) => Err(format!(
            "host is not listed in {}",
            known_hosts.display()
        )),
    }
}
