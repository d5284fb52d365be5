//! §4.5 Stream-marker detector: byte-exact search over file contents,
//! with archive (zip) descent.

use crate::alert::{DetectionResult, SecretLevel};
use crate::context::ScanContext;
use crate::rules::StreamMarkerRule;
use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const ALERT_TYPE_STREAM_MARKER: i32 = 20;
const MMAP_THRESHOLD: u64 = 10 * 1024 * 1024;
const CHUNK_SIZE: usize = 4 * 1024 * 1024;
const ZIP_MEMBER_CAP: u64 = 50 * 1024 * 1024;

pub struct StreamMarkerDetector {
    rules: Vec<StreamMarkerRule>,
}

impl StreamMarkerDetector {
    pub fn new(rules: Vec<StreamMarkerRule>) -> Self {
        Self { rules }
    }

    pub fn set_rules(&mut self, rules: Vec<StreamMarkerRule>) {
        self.rules = rules;
    }

    pub fn detect(&self, ctx: &ScanContext, path: &Path) -> DetectionResult {
        if self.rules.is_empty() {
            return DetectionResult::miss();
        }
        let Ok(meta) = std::fs::metadata(path) else {
            return DetectionResult::miss();
        };
        if meta.len() == 0 {
            return DetectionResult::miss();
        }

        if is_zip(path) {
            if let Some(hit) = self.scan_zip(ctx, path) {
                return hit;
            }
            return DetectionResult::miss();
        }

        if let Some(hit) = self.scan_file(ctx, path, meta.len()) {
            return hit;
        }
        DetectionResult::miss()
    }

    fn scan_file(&self, ctx: &ScanContext, path: &Path, size: u64) -> Option<DetectionResult> {
        if size <= MMAP_THRESHOLD {
            let mut buf = Vec::new();
            File::open(path).ok()?.read_to_end(&mut buf).ok()?;
            return self.first_match(ctx, &buf);
        }
        self.scan_chunked(ctx, path)
    }

    #[allow(unsafe_code)]
    fn scan_chunked(&self, ctx: &ScanContext, path: &Path) -> Option<DetectionResult> {
        let file = File::open(path).ok()?;
        // SAFETY: read-only mapping of a file we just opened for
        // scanning; no other writer is coordinated with, matching the
        // container-format reads elsewhere in this detector.
        let mmap = unsafe { Mmap::map(&file).ok()? };

        let max_pattern_len = self.rules.iter().map(|r| r.pattern_bytes.len()).max()?;
        let overlap = max_pattern_len.saturating_sub(1);
        let mut offset = 0usize;

        while offset < mmap.len() {
            if ctx.is_done() {
                return None;
            }
            let end = (offset + CHUNK_SIZE).min(mmap.len());
            if let Some(hit) = self.first_match(ctx, &mmap[offset..end]) {
                return Some(hit);
            }
            if end == mmap.len() {
                break;
            }
            offset = end.saturating_sub(overlap);
        }
        None
    }

    fn scan_zip(&self, ctx: &ScanContext, path: &Path) -> Option<DetectionResult> {
        let file = File::open(path).ok()?;
        let mut archive = zip::ZipArchive::new(file).ok()?;

        for i in 0..archive.len() {
            if ctx.is_done() {
                return None;
            }
            let mut entry = archive.by_index(i).ok()?;
            if entry.size() > ZIP_MEMBER_CAP {
                continue;
            }
            let mut buf = Vec::new();
            entry.by_ref().take(ZIP_MEMBER_CAP).read_to_end(&mut buf).ok()?;
            if let Some(hit) = self.first_match(ctx, &buf) {
                return Some(hit);
            }
        }
        None
    }

    fn first_match(&self, ctx: &ScanContext, haystack: &[u8]) -> Option<DetectionResult> {
        for rule in &self.rules {
            if ctx.is_done() {
                return None;
            }
            if rule.pattern_bytes.is_empty() {
                continue;
            }
            if contains_bytes(haystack, &rule.pattern_bytes) {
                return Some(DetectionResult {
                    is_hit: true,
                    secret_level: SecretLevel::Secret,
                    rule_id: rule.rule_id,
                    rule_desc: rule.description.clone(),
                    matched_text: hex::encode(&rule.pattern_bytes),
                    context_text: String::new(),
                    alert_type_code: ALERT_TYPE_STREAM_MARKER,
                });
            }
        }
        None
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_zip(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return false;
    }
    let _ = file.seek(SeekFrom::Start(0));
    magic == [0x50, 0x4B, 0x03, 0x04]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rule(id: i64, pattern: &[u8]) -> StreamMarkerRule {
        StreamMarkerRule {
            rule_id: id,
            pattern_bytes: pattern.to_vec(),
            description: "sm".into(),
        }
    }

    #[test]
    fn finds_byte_exact_pattern() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"prefix\x01\x02\x03\x04suffix").unwrap();
        f.flush().unwrap();

        let detector = StreamMarkerDetector::new(vec![rule(1, &[1, 2, 3, 4])]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(result.is_hit);
    }

    #[test]
    fn empty_file_is_a_miss() {
        let f = NamedTempFile::new().unwrap();
        let detector = StreamMarkerDetector::new(vec![rule(1, &[1, 2, 3])]);
        assert!(!detector.detect(&ScanContext::default_deadline(), f.path()).is_hit);
    }

    #[test]
    fn no_rules_is_always_a_miss() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"anything").unwrap();
        f.flush().unwrap();

        let detector = StreamMarkerDetector::new(vec![]);
        assert!(!detector.detect(&ScanContext::default_deadline(), f.path()).is_hit);
    }
}
