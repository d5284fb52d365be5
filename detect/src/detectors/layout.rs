//! §4.5 Layout detector: weighted feature scorer for official-document
//! formatting. Only plain-text extraction is implemented here; OCR and
//! binary-format text extraction are external collaborators.

use crate::alert::{DetectionResult, SecretLevel};
use crate::context::ScanContext;
use crate::rules::LayoutRule;
use std::fs;
use std::path::Path;

const ALERT_TYPE_LAYOUT: i32 = 40;

const HEADER_MARKERS: &[&str] = &["文件编号", "密级", "急件", "document no", "classification"];
const BODY_MARKERS: &[&str] = &["签发人", "抄送", "issued by", "cc:"];

pub struct LayoutDetector {
    rule: LayoutRule,
}

impl LayoutDetector {
    pub fn new(rule: LayoutRule) -> Self {
        Self { rule }
    }

    pub fn set_rules(&mut self, rule: LayoutRule) {
        self.rule = rule;
    }

    pub fn detect(&self, ctx: &ScanContext, path: &Path) -> DetectionResult {
        if ctx.is_done() {
            return DetectionResult::miss();
        }
        let Ok(meta) = fs::metadata(path) else {
            return DetectionResult::miss();
        };
        if meta.len() == 0 {
            return DetectionResult::miss();
        }
        let Ok(text) = fs::read_to_string(path) else {
            return DetectionResult::miss();
        };

        let score = self.score(&text);
        if score < self.rule.threshold {
            return DetectionResult::miss();
        }

        DetectionResult {
            is_hit: true,
            secret_level: SecretLevel::Internal,
            rule_id: self.rule.rule_id,
            rule_desc: "official document layout match".to_string(),
            matched_text: format!("{score:.2}"),
            context_text: String::new(),
            alert_type_code: ALERT_TYPE_LAYOUT,
        }
    }

    fn score(&self, text: &str) -> f64 {
        let lower = text.to_lowercase();
        let header_ratio = feature_ratio(&lower, HEADER_MARKERS);
        let body_ratio = feature_ratio(&lower, BODY_MARKERS);
        let text_feature_ratio = (header_ratio + body_ratio) / 2.0;
        let style_feature_ratio = style_ratio(text);

        self.rule.text_weight * text_feature_ratio + self.rule.style_weight * style_feature_ratio
    }
}

fn feature_ratio(haystack: &str, markers: &[&str]) -> f64 {
    let hits = markers.iter().filter(|m| haystack.contains(*m)).count();
    hits as f64 / markers.len() as f64
}

/// No layout/font metadata is recoverable from raw text; a dated
/// signature line is the only style cue plain text carries.
fn style_ratio(text: &str) -> f64 {
    if text.lines().any(looks_like_dated_signature) {
        1.0
    } else {
        0.0
    }
}

fn looks_like_dated_signature(line: &str) -> bool {
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    let has_date_sep = line.contains('-') || line.contains('/') || line.contains('年');
    digits >= 6 && has_date_sep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_rule() -> LayoutRule {
        LayoutRule::default()
    }

    #[test]
    fn scores_official_looking_document_above_threshold() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(f, "文件编号: 2024-001").unwrap();
        writeln!(f, "密级: 机密 急件").unwrap();
        writeln!(f, "签发人: 张三 抄送: 全体").unwrap();
        writeln!(f, "2024-01-15").unwrap();
        f.flush().unwrap();

        let detector = LayoutDetector::new(default_rule());
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(result.is_hit);
    }

    #[test]
    fn plain_text_scores_below_threshold() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(f, "just a regular note with nothing special in it").unwrap();
        f.flush().unwrap();

        let detector = LayoutDetector::new(default_rule());
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(!result.is_hit);
    }

    #[test]
    fn empty_file_is_a_miss() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let detector = LayoutDetector::new(default_rule());
        assert!(!detector.detect(&ScanContext::default_deadline(), f.path()).is_hit);
    }
}
