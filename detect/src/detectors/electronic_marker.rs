//! §4.5 Electronic-marker detector: inspects a fixed set of metadata
//! entries in container-formatted documents (OOXML, OFD).

use crate::alert::{DetectionResult, SecretLevel};
use crate::context::ScanContext;
use crate::rules::ElectronicMarkerRule;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ALERT_TYPE_ELECTRONIC_MARKER: i32 = 30;

/// Entries inspected across both OOXML and OFD containers.
const METADATA_ENTRIES: &[&str] = &[
    "docProps/core.xml",
    "docProps/custom.xml",
    "document.xml",
];

pub struct ElectronicMarkerDetector {
    rules: Vec<ElectronicMarkerRule>,
}

impl ElectronicMarkerDetector {
    pub fn new(rules: Vec<ElectronicMarkerRule>) -> Self {
        Self { rules }
    }

    pub fn set_rules(&mut self, rules: Vec<ElectronicMarkerRule>) {
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

        let Ok(file) = File::open(path) else {
            return DetectionResult::miss();
        };
        let Ok(mut archive) = zip::ZipArchive::new(file) else {
            return DetectionResult::miss();
        };

        for entry_name in METADATA_ENTRIES {
            if ctx.is_done() {
                return DetectionResult::miss();
            }
            let Ok(mut entry) = archive.by_name(entry_name) else {
                continue;
            };
            let mut xml = String::new();
            if entry.read_to_string(&mut xml).is_err() {
                continue;
            }
            let text = extract_text_content(&xml);

            for rule in &self.rules {
                if text.contains(&rule.tag_text) {
                    return DetectionResult {
                        is_hit: true,
                        secret_level: SecretLevel::TopSecret,
                        rule_id: rule.rule_id,
                        rule_desc: rule.description.clone(),
                        matched_text: rule.tag_text.clone(),
                        context_text: entry_name.to_string(),
                        alert_type_code: ALERT_TYPE_ELECTRONIC_MARKER,
                    };
                }
            }
        }
        DetectionResult::miss()
    }
}

/// Flattens all text nodes from an XML document; malformed XML yields
/// whatever was parsed before the error (defensive, never fatal).
fn extract_text_content(xml: &str) -> String {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut out = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.unescape() {
                    out.push_str(&text);
                    out.push(' ');
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn rule(id: i64, tag: &str) -> ElectronicMarkerRule {
        ElectronicMarkerRule {
            rule_id: id,
            tag_text: tag.to_string(),
            description: "em".into(),
        }
    }

    fn build_ooxml_with_core_xml(core_xml: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        {
            let mut zipw = zip::ZipWriter::new(file.reopen().unwrap());
            zipw.start_file("docProps/core.xml", FileOptions::default())
                .unwrap();
            zipw.write_all(core_xml.as_bytes()).unwrap();
            zipw.finish().unwrap();
        }
        file
    }

    #[test]
    fn finds_classification_tag_in_core_properties() {
        let xml = r#"<?xml version="1.0"?><cp><dc:title>Report</dc:title><cp:keywords>TOP SECRET</cp:keywords></cp>"#;
        let file = build_ooxml_with_core_xml(xml);

        let detector = ElectronicMarkerDetector::new(vec![rule(1, "TOP SECRET")]);
        let result = detector.detect(&ScanContext::default_deadline(), file.path());
        assert!(result.is_hit);
        assert_eq!(result.context_text, "docProps/core.xml");
    }

    #[test]
    fn non_zip_file_is_a_miss() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not a zip").unwrap();
        let detector = ElectronicMarkerDetector::new(vec![rule(1, "TOP SECRET")]);
        assert!(!detector.detect(&ScanContext::default_deadline(), file.path()).is_hit);
    }
}
