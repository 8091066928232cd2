//! Admission-time validation and normalization of site definitions

use crate::error::{Result, SiteError};
use crate::site::{SiteSpec, DEFAULT_BRANCH, DEFAULT_ROOT};
use std::collections::HashSet;
use std::io::BufReader;

/// Minimum length of a site access password
pub const MIN_ACCESS_PASSWORD_LEN: usize = 5;

/// Validate `spec` against the protected hostnames and normalize it in place.
///
/// `protected` holds the lower-cased wildcard host plus every hostname already
/// claimed by an admitted site. Checks run in order and stop at the first
/// failure. On success `spec` has an id, a branch, a root, and lower-cased,
/// de-duplicated hostnames.
pub fn validate(spec: &mut SiteSpec, protected: &HashSet<String>) -> Result<()> {
    if spec.name.trim().is_empty() {
        return Err(SiteError::validation("Please provide a name."));
    }
    if spec.hostnames.iter().all(|h| h.trim().is_empty()) {
        return Err(SiteError::validation("Hostnames are required."));
    }
    if spec.branch.is_empty() {
        spec.branch = DEFAULT_BRANCH.to_string();
    }
    if spec.root.is_empty() {
        spec.root = DEFAULT_ROOT.to_string();
    }
    if spec.access_username.is_empty() != spec.access_password.is_empty() {
        return Err(SiteError::validation(
            "Both username and password must be provided.",
        ));
    }
    if !spec.access_password.is_empty() && spec.access_password.len() < MIN_ACCESS_PASSWORD_LEN {
        return Err(SiteError::validation(format!(
            "Password must be {MIN_ACCESS_PASSWORD_LEN} or more characters long."
        )));
    }
    if spec.id.is_empty() {
        spec.id = uuid::Uuid::new_v4().to_string();
    } else if !is_valid_id(&spec.id) {
        return Err(SiteError::validation("Invalid site id."));
    }
    if let Some(key) = spec.ssh_key() {
        if !is_valid_private_key(key) {
            return Err(SiteError::validation(
                "Unable to parse ssh key. Note: the key should not have a passphrase.",
            ));
        }
    }

    let mut hostnames: Vec<String> = Vec::with_capacity(spec.hostnames.len());
    for hostname in &spec.hostnames {
        let hostname = hostname.trim().to_lowercase();
        if hostname.is_empty() || hostnames.contains(&hostname) {
            continue;
        }
        if protected.contains(&hostname) {
            return Err(SiteError::validation(format!(
                "Cannot use hostname {hostname}"
            )));
        }
        hostnames.push(hostname);
    }
    spec.hostnames = hostnames;

    Ok(())
}

/// Site ids name the clone directory, so they are restricted to a safe alphabet
fn is_valid_id(id: &str) -> bool {
    id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Whether `key` is an unencrypted private key usable for SSH.
///
/// Accepts OpenSSH-format keys and PEM PKCS#1, PKCS#8 and SEC1 keys.
pub fn is_valid_private_key(key: &str) -> bool {
    if key.contains("BEGIN OPENSSH PRIVATE KEY") {
        return match ssh_key::PrivateKey::from_openssh(key.trim()) {
            Ok(parsed) => !parsed.is_encrypted(),
            Err(_) => false,
        };
    }

    let mut reader = BufReader::new(key.as_bytes());
    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(_)))
            | Ok(Some(rustls_pemfile::Item::Pkcs8Key(_)))
            | Ok(Some(rustls_pemfile::Item::Sec1Key(_))) => return true,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return false,
        }
    }
}
