//! §4.4 Detector Manager: fixed-order dispatch over sub-detectors,
//! shared alert assembly.
//!
//! Dispatch order: electronic marker (in-document metadata) → stream
//! marker (the in-scope stand-in for the out-of-scope OCR-based
//! "visual secret marker" slot — OCR itself is an external
//! collaborator, §1) → official-document layout classifier →
//! file-hash match → keyword match. Implementers MUST preserve this
//! order (§4.4).

use crate::alert::{AlertLogItem, AlertRecord, FileMeta, HostMeta};
use crate::context::ScanContext;
use crate::detectors::{
    ElectronicMarkerDetector, HashDetector, KeywordDetector, LayoutDetector, StreamMarkerDetector,
};
use crate::rules::{ElectronicMarkerRule, HashRule, LayoutRule, MarkerRule, StreamMarkerRule};
use md5::Digest as _;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    ElectronicMarker,
    StreamMarker,
    Layout,
    Hash,
    Keyword,
}

struct Enabled {
    electronic_marker: bool,
    stream_marker: bool,
    layout: bool,
    hash: bool,
    keyword: bool,
}

impl Default for Enabled {
    fn default() -> Self {
        Self {
            electronic_marker: true,
            stream_marker: true,
            layout: true,
            hash: true,
            keyword: true,
        }
    }
}

pub struct DetectorManager {
    host: HostMeta,
    electronic_marker: RwLock<ElectronicMarkerDetector>,
    stream_marker: RwLock<StreamMarkerDetector>,
    layout: RwLock<LayoutDetector>,
    hash: RwLock<HashDetector>,
    keyword: RwLock<KeywordDetector>,
    enabled: RwLock<Enabled>,
}

impl DetectorManager {
    pub fn new(host: HostMeta) -> Self {
        Self {
            host,
            electronic_marker: RwLock::new(ElectronicMarkerDetector::new(Vec::new())),
            stream_marker: RwLock::new(StreamMarkerDetector::new(Vec::new())),
            layout: RwLock::new(LayoutDetector::new(LayoutRule::default())),
            hash: RwLock::new(HashDetector::new(Vec::new())),
            keyword: RwLock::new(KeywordDetector::new(Vec::new())),
            enabled: RwLock::new(Enabled::default()),
        }
    }

    pub fn enable(&self, module: Module) {
        self.set_enabled(module, true);
    }

    pub fn disable(&self, module: Module) {
        self.set_enabled(module, false);
    }

    fn set_enabled(&self, module: Module, value: bool) {
        let mut e = self.enabled.write().expect("lock poisoned");
        match module {
            Module::ElectronicMarker => e.electronic_marker = value,
            Module::StreamMarker => e.stream_marker = value,
            Module::Layout => e.layout = value,
            Module::Hash => e.hash = value,
            Module::Keyword => e.keyword = value,
        }
    }

    pub fn set_hash_rules(&self, rules: Vec<HashRule>) {
        self.hash.write().expect("lock poisoned").set_rules(rules);
    }

    pub fn set_keyword_rules(&self, rules: Vec<MarkerRule>) {
        self.keyword.write().expect("lock poisoned").set_rules(rules);
    }

    pub fn set_stream_marker_rules(&self, rules: Vec<StreamMarkerRule>) {
        self.stream_marker.write().expect("lock poisoned").set_rules(rules);
    }

    pub fn set_electronic_marker_rules(&self, rules: Vec<ElectronicMarkerRule>) {
        self.electronic_marker.write().expect("lock poisoned").set_rules(rules);
    }

    pub fn set_layout_rule(&self, rule: LayoutRule) {
        self.layout.write().expect("lock poisoned").set_rules(rule);
    }

    /// §4.4 `detect`: stat, MD5 up-front, then first-hit-wins dispatch
    /// in the fixed order.
    pub fn detect(
        &self,
        ctx: &ScanContext,
        file_path: &Path,
    ) -> (bool, Option<AlertRecord>, Option<AlertLogItem>) {
        let Ok(meta) = std::fs::metadata(file_path) else {
            return (false, None, None);
        };
        let Some(md5_hex) = md5_of_file(file_path) else {
            return (false, None, None);
        };

        let file_meta = FileMeta {
            path: file_path.to_string_lossy().to_string(),
            name: file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: meta.len(),
            md5: md5_hex,
        };

        let enabled = {
            let e = self.enabled.read().expect("lock poisoned");
            Enabled {
                electronic_marker: e.electronic_marker,
                stream_marker: e.stream_marker,
                layout: e.layout,
                hash: e.hash,
                keyword: e.keyword,
            }
        };

        macro_rules! try_stage {
            ($enabled:expr, $name:literal, $detector:expr) => {
                if $enabled && !ctx.is_done() {
                    let result = $detector.read().expect("lock poisoned").detect(ctx, file_path);
                    if result.is_hit {
                        let alert = AlertRecord::assemble(&self.host, &file_meta, &result);
                        let log = AlertLogItem::new(&file_meta.path, $name, true);
                        return (true, Some(alert), Some(log));
                    }
                }
            };
        }

        try_stage!(enabled.electronic_marker, "electronic_marker", self.electronic_marker);
        try_stage!(enabled.stream_marker, "stream_marker", self.stream_marker);
        try_stage!(enabled.layout, "layout", self.layout);
        try_stage!(enabled.hash, "hash", self.hash);
        try_stage!(enabled.keyword, "keyword", self.keyword);

        let log = AlertLogItem::new(&file_meta.path, "none", false);
        (false, None, Some(log))
    }
}

fn md5_of_file(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let mut hasher = md5::Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::HashType;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn dispatch_stops_at_first_hit_hash_detector() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();

        let md5_hex = md5_of_file(f.path()).unwrap();
        let manager = DetectorManager::new(HostMeta::default());
        manager.set_hash_rules(vec![HashRule {
            rule_id: 1001,
            hash_type: HashType::Md5,
            hash_value: md5_hex.clone(),
            description: "seed".into(),
        }]);

        let (hit, alert, log) = manager.detect(&ScanContext::default_deadline(), f.path());
        assert!(hit);
        let alert = alert.unwrap();
        assert_eq!(alert.file_md5, md5_hex);
        assert_eq!(alert.rule_id, 1001);
        assert_eq!(log.unwrap().detector, "hash");
    }

    #[test]
    fn disabled_module_is_skipped() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();

        let md5_hex = md5_of_file(f.path()).unwrap();
        let manager = DetectorManager::new(HostMeta::default());
        manager.set_hash_rules(vec![HashRule {
            rule_id: 1001,
            hash_type: HashType::Md5,
            hash_value: md5_hex,
            description: "seed".into(),
        }]);
        manager.disable(Module::Hash);

        let (hit, _, _) = manager.detect(&ScanContext::default_deadline(), f.path());
        assert!(!hit);
    }

    #[test]
    fn no_match_returns_miss_with_audit_log() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"nothing interesting").unwrap();
        f.flush().unwrap();

        let manager = DetectorManager::new(HostMeta::default());
        let (hit, alert, log) = manager.detect(&ScanContext::default_deadline(), f.path());
        assert!(!hit);
        assert!(alert.is_none());
        assert_eq!(log.unwrap().detector, "none");
    }
}
