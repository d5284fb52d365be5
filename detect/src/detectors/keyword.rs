//! §4.5 Keyword / secret-level marker detector (text).
//!
//! Extracts text (plain-text files read directly; other formats are
//! an external extractor's concern, out of scope here), lowercases,
//! and scans for each configured pattern with a rune-safe 40-char
//! context window.

use crate::alert::{DetectionResult, SecretLevel};
use crate::context::ScanContext;
use crate::rules::MarkerRule;
use std::fs;
use std::path::Path;

const ALERT_TYPE_KEYWORD: i32 = 10;
const CONTEXT_RADIUS: usize = 20;

pub struct KeywordDetector {
    rules: Vec<MarkerRule>,
}

impl KeywordDetector {
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        Self { rules }
    }

    pub fn set_rules(&mut self, rules: Vec<MarkerRule>) {
        self.rules = rules;
    }

    pub fn detect(&self, ctx: &ScanContext, path: &Path) -> DetectionResult {
        let Ok(meta) = fs::metadata(path) else {
            return DetectionResult::miss();
        };
        if meta.len() == 0 {
            return DetectionResult::miss();
        }

        let Some(text) = extract_text(path) else {
            return DetectionResult::miss();
        };
        let lower = text.to_lowercase();

        let mut best: Option<DetectionResult> = None;
        for rule in &self.rules {
            if ctx.is_done() {
                return best.unwrap_or_default();
            }
            if !within_size_filter(rule, meta.len()) {
                continue;
            }
            let pattern = rule.pattern_text.to_lowercase();
            if pattern.is_empty() {
                continue;
            }
            if let Some(byte_idx) = lower.find(&pattern) {
                let candidate = DetectionResult {
                    is_hit: true,
                    secret_level: level_from_sensitivity(rule.sensitivity_level),
                    rule_id: rule.rule_id,
                    rule_desc: rule.description.clone(),
                    matched_text: rule.pattern_text.clone(),
                    context_text: context_window(&lower, byte_idx, pattern.len()),
                    alert_type_code: ALERT_TYPE_KEYWORD,
                };
                best = Some(match best {
                    Some(current) if current.secret_level >= candidate.secret_level => current,
                    _ => candidate,
                });
            }
        }
        best.unwrap_or_default()
    }
}

fn within_size_filter(rule: &MarkerRule, size: u64) -> bool {
    let min_ok = rule.size_filter.min == 0 || size >= rule.size_filter.min;
    let max_ok = rule.size_filter.max == 0 || size <= rule.size_filter.max;
    min_ok && max_ok
}

/// Ordinal ranking used only to pick the highest-sensitivity hit when
/// several patterns match; not part of the wire representation.
fn level_from_sensitivity(level: u8) -> SecretLevel {
    match level {
        5 => SecretLevel::TopSecret,
        4 => SecretLevel::Secret,
        3 => SecretLevel::Confidential,
        2 => SecretLevel::Internal,
        _ => SecretLevel::Unknown,
    }
}

/// Plain-text extraction only; anything requiring an external
/// extractor collaborator is out of scope.
fn extract_text(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

/// 20 runes left, 20 right, centered on the match start, never
/// splitting a multi-byte character.
fn context_window(text: &str, byte_idx: usize, match_byte_len: usize) -> String {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let match_char_idx = chars
        .iter()
        .position(|(b, _)| *b == byte_idx)
        .unwrap_or(0);

    let match_char_len = text[byte_idx..byte_idx + match_byte_len].chars().count();
    let start = match_char_idx.saturating_sub(CONTEXT_RADIUS);
    let end = (match_char_idx + match_char_len + CONTEXT_RADIUS).min(chars.len());

    chars[start..end].iter().map(|(_, c)| *c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::SizeFilter;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rule(id: i64, pattern: &str, sensitivity: u8) -> MarkerRule {
        MarkerRule {
            rule_id: id,
            pattern_text: pattern.to_string(),
            sensitivity_level: sensitivity,
            file_type_filter: vec![],
            size_filter: SizeFilter { min: 0, max: 0 },
            description: "kw".to_string(),
        }
    }

    #[test]
    fn finds_lowercased_match_with_context_window() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "the document is marked CONFIDENTIAL for internal use only today").unwrap();
        f.flush().unwrap();

        let detector = KeywordDetector::new(vec![rule(1, "confidential", 3)]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(result.is_hit);
        assert!(result.context_text.contains("confidential"));
    }

    #[test]
    fn empty_file_is_a_miss() {
        let f = NamedTempFile::new().unwrap();
        let detector = KeywordDetector::new(vec![rule(1, "secret", 3)]);
        assert!(!detector.detect(&ScanContext::default_deadline(), f.path()).is_hit);
    }

    #[test]
    fn sensitivity_levels_combine_by_maximum() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "contains both internal and topsecret markers").unwrap();
        f.flush().unwrap();

        let detector =
            KeywordDetector::new(vec![rule(1, "internal", 2), rule(2, "topsecret", 5)]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert_eq!(result.secret_level, SecretLevel::TopSecret);
    }

    #[test]
    fn context_window_is_rune_safe_across_multibyte_chars() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "文档包含机密标记内容在此处用于测试安全上下文窗口截取逻辑").unwrap();
        f.flush().unwrap();

        let detector = KeywordDetector::new(vec![rule(1, "机密", 3)]);
        let result = detector.detect(&ScanContext::default_deadline(), f.path());
        assert!(result.is_hit);
        assert!(result.context_text.chars().count() <= 42);
    }
}
