//! §4.5 Hash detector: MD5/SM3 dual-map lookup.

use crate::alert::{DetectionResult, SecretLevel};
use crate::context::ScanContext;
use crate::rules::{HashRule, HashType};
use md5::{Digest as _, Md5};
use sm3::{Digest as _, Sm3};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const DEFAULT_SIZE_CAP: u64 = 100 * 1024 * 1024;
const ALERT_TYPE_HASH: i32 = 99;
const READ_CHUNK: usize = 64 * 1024;

pub struct HashDetector {
    by_hex: HashMap<(HashType, String), i64>,
    by_id: HashMap<i64, HashRule>,
    size_cap: u64,
}

impl HashDetector {
    pub fn new(rules: Vec<HashRule>) -> Self {
        let mut detector = Self {
            by_hex: HashMap::new(),
            by_id: HashMap::new(),
            size_cap: DEFAULT_SIZE_CAP,
        };
        detector.set_rules(rules);
        detector
    }

    pub fn with_size_cap(mut self, cap: u64) -> Self {
        self.size_cap = cap;
        self
    }

    pub fn set_rules(&mut self, rules: Vec<HashRule>) {
        self.by_hex.clear();
        self.by_id.clear();
        for rule in rules {
            self.by_hex
                .insert((rule.hash_type, rule.hash_value.clone()), rule.rule_id);
            self.by_id.insert(rule.rule_id, rule);
        }
    }

    fn wants(&self, kind: HashType) -> bool {
        self.by_hex.keys().any(|(t, _)| *t == kind)
    }

    pub fn detect(&self, ctx: &ScanContext, path: &Path) -> DetectionResult {
        let Ok(meta) = std::fs::metadata(path) else {
            return DetectionResult::miss();
        };
        if meta.len() == 0 || meta.len() > self.size_cap {
            return DetectionResult::miss();
        }

        let want_md5 = self.wants(HashType::Md5);
        let want_sm3 = self.wants(HashType::Sm3);
        if !want_md5 && !want_sm3 {
            return DetectionResult::miss();
        }

        let Ok((md5_hex, sm3_hex)) = hash_file(path, want_md5, want_sm3, ctx) else {
            return DetectionResult::miss();
        };

        if let Some(hex) = &md5_hex {
            if let Some(hit) = self.lookup(HashType::Md5, hex) {
                return hit;
            }
        }
        if let Some(hex) = &sm3_hex {
            if let Some(hit) = self.lookup(HashType::Sm3, hex) {
                return hit;
            }
        }
        DetectionResult::miss()
    }

    fn lookup(&self, kind: HashType, hex: &str) -> Option<DetectionResult> {
        let rule_id = *self.by_hex.get(&(kind, hex.to_string()))?;
        let rule = self.by_id.get(&rule_id)?;
        Some(DetectionResult {
            is_hit: true,
            secret_level: SecretLevel::Internal,
            rule_id,
            rule_desc: rule.description.clone(),
            matched_text: hex.to_string(),
            context_text: String::new(),
            alert_type_code: ALERT_TYPE_HASH,
        })
    }
}

fn hash_file(
    path: &Path,
    want_md5: bool,
    want_sm3: bool,
    ctx: &ScanContext,
) -> std::io::Result<(Option<String>, Option<String>)> {
    let mut file = File::open(path)?;
    let mut md5_hasher = want_md5.then(Md5::new);
    let mut sm3_hasher = want_sm3.then(Sm3::new);

    let mut buf = [0u8; READ_CHUNK];
    loop {
        if ctx.is_done() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "cancelled"));
        }
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if let Some(h) = md5_hasher.as_mut() {
            h.update(&buf[..n]);
        }
        if let Some(h) = sm3_hasher.as_mut() {
            h.update(&buf[..n]);
        }
    }

    Ok((
        md5_hasher.map(|h| hex::encode(h.finalize())),
        sm3_hasher.map(|h| hex::encode(h.finalize())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rule(id: i64, kind: HashType, value: &str) -> HashRule {
        HashRule {
            rule_id: id,
            hash_type: kind,
            hash_value: value.to_string(),
            description: "seed".into(),
        }
    }

    #[test]
    fn scenario_1_empty_file_guard() {
        let f = NamedTempFile::new().unwrap();
        let detector = HashDetector::new(vec![rule(
            1001,
            HashType::Md5,
            "d41d8cd98f00b204e9800998ecf8427e",
        )]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(!result.is_hit);
    }

    #[test]
    fn scenario_2_md5_hit() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();

        let md5_hex = {
            let mut h = Md5::new();
            h.update(b"hello world");
            hex::encode(h.finalize())
        };

        let detector = HashDetector::new(vec![rule(1001, HashType::Md5, &md5_hex)]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(result.is_hit);
        assert_eq!(result.rule_id, 1001);
        assert_eq!(result.matched_text, md5_hex);
        assert_eq!(result.alert_type_code, ALERT_TYPE_HASH);
        assert_eq!(result.secret_level, SecretLevel::Internal);
    }

    #[test]
    fn oversized_file_is_skipped() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(&vec![0u8; 10]).unwrap();
        f.flush().unwrap();

        let detector = HashDetector::new(vec![rule(1, HashType::Md5, "x")]).with_size_cap(5);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(!result.is_hit);
    }

    #[test]
    fn md5_only_ruleset_skips_sm3_computation() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"data").unwrap();
        f.flush().unwrap();

        let detector = HashDetector::new(vec![rule(1, HashType::Md5, "nomatch")]);
        assert!(!detector.wants(HashType::Sm3));
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(!result.is_hit);
    }
}
