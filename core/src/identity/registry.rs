//! §3/§4.1 Device identity registry (Secure Core).
//!
//! PERSISTENCE:
//! - `agent.id`, mode 0600, single line, UTF-8, trimmed.
//! - Linux root: `/var/lib/<app>/agent.id`; elsewhere: working directory.
//! - Writes: `<path>.tmp` → fsync → rename over `<path>`.
//! - Best-effort immutable-attribute toggle around the write on Linux.
//!
//! INVARIANT: device-id is either empty (unregistered) or a non-empty
//! printable string of at most 64 characters.

use crate::crypto::derive_machine_key;
use crate::identity::fingerprint::compute_fingerprint;
use crate::memory::GuardedKey16;
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

const APP_NAME: &str = "classifyd";
const ID_FILE: &str = "agent.id";
const MAX_DEVICE_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    FingerprintUnavailable,
    Io(String),
    InvalidDeviceId,
}

impl core::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IdentityError::FingerprintUnavailable => {
                write!(f, "hardware fingerprint could not be established")
            }
            IdentityError::Io(msg) => write!(f, "identity storage error: {msg}"),
            IdentityError::InvalidDeviceId => write!(f, "device id is not valid printable ASCII <= 64 chars"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Stable host identity, per §3.
#[derive(Clone)]
pub struct DeviceIdentity {
    version: &'static str,
    vendor: &'static str,
    fingerprint: String,
    device_id: String,
    id_path: PathBuf,
}

impl core::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("version", &self.version)
            .field("vendor", &self.vendor)
            .field("fingerprint", &self.fingerprint)
            .field("device_id", &self.device_id)
            .finish()
    }
}

impl DeviceIdentity {
    /// §4.1 `init`.
    pub fn init(data_dir: Option<&Path>) -> Result<Self, IdentityError> {
        let fingerprint = compute_fingerprint().ok_or(IdentityError::FingerprintUnavailable)?;
        let id_path = resolve_id_path(data_dir);

        let device_id = match fs::read_to_string(&id_path) {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => String::new(),
        };
        validate_device_id(&device_id)?;

        Ok(Self {
            version: env!("CARGO_PKG_VERSION"),
            vendor: APP_NAME,
            fingerprint,
            device_id,
            id_path,
        })
    }

    pub fn get(&self) -> &Self {
        self
    }

    pub fn version(&self) -> &str {
        self.version
    }

    pub fn vendor(&self) -> &str {
        self.vendor
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_registered(&self) -> bool {
        !self.device_id.is_empty()
    }

    /// `<device-id> / <version> (<vendor>)` or, unregistered,
    /// `<version> (<vendor>)` — §6 wire protocol User-Agent.
    pub fn user_agent(&self) -> String {
        if self.is_registered() {
            format!("{} / {} ({})", self.device_id, self.version, self.vendor)
        } else {
            format!("{} ({})", self.version, self.vendor)
        }
    }

    /// §4.1 `update_device_id` — atomic write-through with best-effort
    /// immutability toggling around the write.
    pub fn update_device_id(&mut self, new_id: &str) -> Result<(), IdentityError> {
        validate_device_id(new_id)?;

        toggle_immutable(&self.id_path, false);
        let result = atomic_write(&self.id_path, new_id);
        toggle_immutable(&self.id_path, true);
        result?;

        self.device_id = new_id.to_string();
        Ok(())
    }

    /// §4.1 `derive_key`.
    pub fn derive_key(&self) -> GuardedKey16 {
        derive_machine_key(&self.fingerprint)
    }
}

fn validate_device_id(id: &str) -> Result<(), IdentityError> {
    if id.is_empty() {
        return Ok(());
    }
    if id.len() > MAX_DEVICE_ID_LEN || !id.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
        return Err(IdentityError::InvalidDeviceId);
    }
    Ok(())
}

fn resolve_id_path(data_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = data_dir {
        return dir.join(ID_FILE);
    }

    #[cfg(target_os = "linux")]
    {
        if is_root() {
            return PathBuf::from(format!("/var/lib/{APP_NAME}")).join(ID_FILE);
        }
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(ID_FILE)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

fn atomic_write(path: &Path, contents: &str) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IdentityError::Io(e.to_string()))?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| IdentityError::Io(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| IdentityError::Io(e.to_string()))?;
        }

        file.write_all(contents.as_bytes())
            .map_err(|e| IdentityError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| IdentityError::Io(e.to_string()))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| IdentityError::Io(e.to_string()))?;
    Ok(())
}

/// Best-effort `chattr +i`/`-i` toggle. Failure is non-fatal: the
/// immutable bit is a defense-in-depth measure, not a correctness
/// requirement, and most containers/filesystems don't support it.
#[cfg(target_os = "linux")]
fn toggle_immutable(path: &Path, immutable: bool) {
    if !is_root() || !path.exists() {
        return;
    }
    let flag = if immutable { "+i" } else { "-i" };
    let _ = Command::new("chattr").arg(flag).arg(path).output();
}

#[cfg(not(target_os = "linux"))]
fn toggle_immutable(_path: &Path, _immutable: bool) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn device_id_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let mut id = DeviceIdentity {
            version: "1.0.0",
            vendor: APP_NAME,
            fingerprint: "deadbeef".into(),
            device_id: String::new(),
            id_path: dir.path().join(ID_FILE),
        };

        assert!(!id.is_registered());
        id.update_device_id("server-assigned-123").unwrap();
        assert_eq!(id.device_id(), "server-assigned-123");

        let reloaded = fs::read_to_string(dir.path().join(ID_FILE)).unwrap();
        assert_eq!(reloaded.trim(), "server-assigned-123");
    }

    #[test]
    fn user_agent_format_unregistered() {
        let id = DeviceIdentity {
            version: "1.0.0",
            vendor: "classifyd",
            fingerprint: "x".into(),
            device_id: String::new(),
            id_path: PathBuf::from("/tmp/unused"),
        };
        assert_eq!(id.user_agent(), "1.0.0 (classifyd)");
    }

    #[test]
    fn user_agent_format_registered() {
        let id = DeviceIdentity {
            version: "1.0.0",
            vendor: "classifyd",
            fingerprint: "x".into(),
            device_id: "abc".into(),
            id_path: PathBuf::from("/tmp/unused"),
        };
        assert_eq!(id.user_agent(), "abc / 1.0.0 (classifyd)");
    }

    #[test]
    fn rejects_device_id_over_64_chars() {
        let long = "a".repeat(65);
        assert_eq!(validate_device_id(&long), Err(IdentityError::InvalidDeviceId));
    }
}
