//! Hardware fingerprint (NON-SECRET, STABLE).
//!
//! `hex(SM3(machine_id + "|" + primary_mac))`, falling back to the
//! hostname when no machine-id is readable.

use crate::crypto::hash_sm3;
use std::fs;

const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

fn read_machine_id() -> Option<String> {
    for path in MACHINE_ID_PATHS {
        if let Ok(contents) = fs::read_to_string(path) {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn primary_mac() -> Option<String> {
    let entries = fs::read_dir("/sys/class/net").ok()?;
    let mut candidates: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            if name == "lo" {
                return None;
            }
            let addr_path = entry.path().join("address");
            let mac = fs::read_to_string(addr_path).ok()?;
            let mac = mac.trim();
            if mac.is_empty() || mac == "00:00:00:00:00:00" {
                return None;
            }
            Some((name, mac.to_string()))
        })
        .map(|(_, mac)| mac)
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Compute the stable hardware fingerprint string.
///
/// Returns `None` only when neither a machine-id, a MAC address, nor a
/// hostname could be determined — an essentially unreachable condition
/// on any real host, surfaced by the caller as a fatal `IdentityError`.
pub fn compute_fingerprint() -> Option<String> {
    let machine_id = read_machine_id().or_else(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
    })?;

    let mac = primary_mac().unwrap_or_default();
    let material = format!("{machine_id}|{mac}");
    Some(hash_sm3(material.as_bytes()).to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic_given_fixed_material() {
        let a = hash_sm3(b"fixed|aa:bb:cc:dd:ee:ff").to_hex();
        let b = hash_sm3(b"fixed|aa:bb:cc:dd:ee:ff").to_hex();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_hex_and_fixed_width() {
        let digest = hash_sm3(b"anything").to_hex();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
