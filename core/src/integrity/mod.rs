//! §4.10 Integrity monitor (Secure Core).
//!
//! Computes the SM3 digest of the agent's own executable at start,
//! then periodically re-stats and re-hashes it, reporting violations.
//! The baseline is never re-anchored at runtime.

use crate::crypto::{hash_sm3, HashOutput};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// §4.10 violation kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    FileDeleted,
    ReadError(String),
    PermChanged,
    FileModified { baseline: String, observed: String },
}

impl core::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IntegrityViolation::FileDeleted => write!(f, "monitored executable is missing"),
            IntegrityViolation::ReadError(msg) => write!(f, "monitored executable unreadable: {msg}"),
            IntegrityViolation::PermChanged => write!(f, "monitored executable is world-writable"),
            IntegrityViolation::FileModified { baseline, observed } => write!(
                f,
                "digest mismatch: baseline={baseline} observed={observed}"
            ),
        }
    }
}

/// Self-hash integrity monitor for the agent's own executable.
pub struct IntegrityMonitor {
    path: PathBuf,
    baseline: HashOutput,
    interval: Duration,
}

impl IntegrityMonitor {
    /// Compute the baseline digest of `path` at construction time.
    pub fn start(path: &Path, interval: Duration) -> std::io::Result<Self> {
        let baseline = hash_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            baseline,
            interval: interval.max(MIN_INTERVAL),
        })
    }

    pub fn with_default_interval(path: &Path) -> std::io::Result<Self> {
        Self::start(path, DEFAULT_INTERVAL)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn baseline(&self) -> &HashOutput {
        &self.baseline
    }

    /// Run one check, returning `Some(violation)` if the executable no
    /// longer matches the baseline, is missing, unreadable, or
    /// world-writable.
    pub fn check(&self) -> Option<IntegrityViolation> {
        let meta = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Some(IntegrityViolation::FileDeleted)
            }
            Err(e) => return Some(IntegrityViolation::ReadError(e.to_string())),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o002 != 0 {
                return Some(IntegrityViolation::PermChanged);
            }
        }

        match hash_file(&self.path) {
            Ok(observed) if observed == self.baseline => None,
            Ok(observed) => Some(IntegrityViolation::FileModified {
                baseline: self.baseline.to_hex(),
                observed: observed.to_hex(),
            }),
            Err(e) => Some(IntegrityViolation::ReadError(e.to_string())),
        }
    }
}

fn hash_file(path: &Path) -> std::io::Result<HashOutput> {
    let file = fs::File::open(path)?;
    crate::crypto::sm3_hash::hash_sm3_reader(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn scenario_3_detects_modification() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"version 1.0 (secure)").unwrap();
        f.flush().unwrap();

        let monitor = IntegrityMonitor::start(f.path(), Duration::from_secs(1)).unwrap();
        assert!(monitor.check().is_none());

        let mut f2 = std::fs::OpenOptions::new().write(true).truncate(true).open(f.path()).unwrap();
        f2.write_all(b"version 6.6.6 (hacked)").unwrap();
        f2.flush().unwrap();

        match monitor.check() {
            Some(IntegrityViolation::FileModified { baseline, observed }) => {
                assert_ne!(baseline, observed);
            }
            other => panic!("expected FileModified, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reports_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        std::fs::write(&path, b"x").unwrap();
        let monitor = IntegrityMonitor::start(&path, Duration::from_secs(1)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(monitor.check(), Some(IntegrityViolation::FileDeleted));
    }

    #[test]
    fn interval_floors_at_one_second() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"x").unwrap();
        let monitor = IntegrityMonitor::start(&path, Duration::from_millis(10)).unwrap();
        assert_eq!(monitor.interval(), MIN_INTERVAL);
    }
}
