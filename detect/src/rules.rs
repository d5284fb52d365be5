//! §3 per-module rule types and their §6 wire encodings.
//!
//! Wire rules are deliberately separate from domain rules: the wire
//! shape (`rule_type: 0|1`, base64 pattern bytes, ...) is a persistence
//! detail, not what sub-detectors want to hold in memory.

use serde::{Deserialize, Serialize};

pub trait RuleId {
    fn rule_id(&self) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    Md5,
    Sm3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRule {
    pub rule_id: i64,
    pub hash_type: HashType,
    pub hash_value: String,
    pub description: String,
}

impl RuleId for HashRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeFilter {
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerRule {
    pub rule_id: i64,
    pub pattern_text: String,
    pub sensitivity_level: u8,
    pub file_type_filter: Vec<String>,
    pub size_filter: SizeFilter,
    pub description: String,
}

impl RuleId for MarkerRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamMarkerRule {
    pub rule_id: i64,
    pub pattern_bytes: Vec<u8>,
    pub description: String,
}

impl RuleId for StreamMarkerRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElectronicMarkerRule {
    pub rule_id: i64,
    pub tag_text: String,
    pub description: String,
}

impl RuleId for ElectronicMarkerRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

/// Global layout-scorer parameters. Not keyed by a meaningful
/// `rule_id`; `reset`/`add` both replace the single active entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRule {
    pub rule_id: i64,
    pub threshold: f64,
    pub text_weight: f64,
    pub style_weight: f64,
}

impl Default for LayoutRule {
    fn default() -> Self {
        Self {
            rule_id: 0,
            threshold: 0.6,
            text_weight: 0.7,
            style_weight: 0.3,
        }
    }
}

impl RuleId for LayoutRule {
    fn rule_id(&self) -> i64 {
        self.rule_id
    }
}

// ---- §6 wire encodings ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHashRule {
    pub rule_id: i64,
    pub rule_type: u8,
    pub rule_content: String,
    pub rule_desc: String,
}

impl From<&HashRule> for WireHashRule {
    fn from(r: &HashRule) -> Self {
        Self {
            rule_id: r.rule_id,
            rule_type: match r.hash_type {
                HashType::Md5 => 0,
                HashType::Sm3 => 1,
            },
            rule_content: r.hash_value.clone(),
            rule_desc: r.description.clone(),
        }
    }
}

impl TryFrom<WireHashRule> for HashRule {
    type Error = String;

    fn try_from(w: WireHashRule) -> Result<Self, Self::Error> {
        let hash_type = match w.rule_type {
            0 => HashType::Md5,
            1 => HashType::Sm3,
            other => return Err(format!("unknown hash rule_type {other}")),
        };
        Ok(Self {
            rule_id: w.rule_id,
            hash_type,
            hash_value: w.rule_content.to_lowercase(),
            description: w.rule_desc,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFileSizeFilter {
    pub min_size: u64,
    pub max_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireKeywordRule {
    pub rule_id: i64,
    pub rule_content: String,
    pub rule_desc: String,
    pub min_match_count: u8,
    pub filter_file_type: Vec<String>,
    pub filter_file_size: WireFileSizeFilter,
}

impl From<&MarkerRule> for WireKeywordRule {
    fn from(r: &MarkerRule) -> Self {
        Self {
            rule_id: r.rule_id,
            rule_content: r.pattern_text.clone(),
            rule_desc: r.description.clone(),
            min_match_count: r.sensitivity_level,
            filter_file_type: r.file_type_filter.clone(),
            filter_file_size: WireFileSizeFilter {
                min_size: r.size_filter.min,
                max_size: r.size_filter.max,
            },
        }
    }
}

impl From<WireKeywordRule> for MarkerRule {
    fn from(w: WireKeywordRule) -> Self {
        Self {
            rule_id: w.rule_id,
            pattern_text: w.rule_content,
            sensitivity_level: w.min_match_count.clamp(1, 5),
            file_type_filter: w.filter_file_type,
            size_filter: SizeFilter {
                min: w.filter_file_size.min_size,
                max: w.filter_file_size.max_size,
            },
            description: w.rule_desc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireStreamMarkerRule {
    pub rule_id: i64,
    pub rule_content: String,
    pub rule_desc: String,
}

impl From<&StreamMarkerRule> for WireStreamMarkerRule {
    fn from(r: &StreamMarkerRule) -> Self {
        Self {
            rule_id: r.rule_id,
            rule_content: base64_encode(&r.pattern_bytes),
            rule_desc: r.description.clone(),
        }
    }
}

impl TryFrom<WireStreamMarkerRule> for StreamMarkerRule {
    type Error = String;

    fn try_from(w: WireStreamMarkerRule) -> Result<Self, Self::Error> {
        let pattern_bytes =
            base64_decode(&w.rule_content).map_err(|e| format!("bad base64 pattern: {e}"))?;
        if pattern_bytes.is_empty() {
            return Err("pattern_bytes must be at least 1 byte".into());
        }
        Ok(Self {
            rule_id: w.rule_id,
            pattern_bytes,
            description: w.rule_desc,
        })
    }
}

/// Bridges a domain rule to its §6 wire encoding for policy file
/// persistence.
pub trait WireRule: Sized {
    type Wire: Serialize + for<'de> Deserialize<'de>;

    fn to_wire(&self) -> Self::Wire;
    fn from_wire(wire: Self::Wire) -> Result<Self, String>;
}

impl WireRule for HashRule {
    type Wire = WireHashRule;

    fn to_wire(&self) -> Self::Wire {
        WireHashRule::from(self)
    }

    fn from_wire(wire: Self::Wire) -> Result<Self, String> {
        wire.try_into()
    }
}

impl WireRule for MarkerRule {
    type Wire = WireKeywordRule;

    fn to_wire(&self) -> Self::Wire {
        WireKeywordRule::from(self)
    }

    fn from_wire(wire: Self::Wire) -> Result<Self, String> {
        Ok(wire.into())
    }
}

impl WireRule for StreamMarkerRule {
    type Wire = WireStreamMarkerRule;

    fn to_wire(&self) -> Self::Wire {
        WireStreamMarkerRule::from(self)
    }

    fn from_wire(wire: Self::Wire) -> Result<Self, String> {
        wire.try_into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireElectronicMarkerRule {
    pub rule_id: i64,
    pub rule_content: String,
    pub rule_desc: String,
}

impl WireRule for ElectronicMarkerRule {
    type Wire = WireElectronicMarkerRule;

    fn to_wire(&self) -> Self::Wire {
        WireElectronicMarkerRule {
            rule_id: self.rule_id,
            rule_content: self.tag_text.clone(),
            rule_desc: self.description.clone(),
        }
    }

    fn from_wire(wire: Self::Wire) -> Result<Self, String> {
        Ok(Self {
            rule_id: wire.rule_id,
            tag_text: wire.rule_content,
            description: wire.rule_desc,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireLayoutRule {
    pub rule_id: i64,
    pub threshold: f64,
    pub text_weight: f64,
    pub style_weight: f64,
}

impl WireRule for LayoutRule {
    type Wire = WireLayoutRule;

    fn to_wire(&self) -> Self::Wire {
        WireLayoutRule {
            rule_id: self.rule_id,
            threshold: self.threshold,
            text_weight: self.text_weight,
            style_weight: self.style_weight,
        }
    }

    fn from_wire(wire: Self::Wire) -> Result<Self, String> {
        Ok(Self {
            rule_id: wire.rule_id,
            threshold: wire.threshold,
            text_weight: wire.text_weight,
            style_weight: wire.style_weight,
        })
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rule_round_trips_through_wire_form() {
        let r = HashRule {
            rule_id: 1001,
            hash_type: HashType::Md5,
            hash_value: "d41d8cd98f00b204e9800998ecf8427e".into(),
            description: "empty file md5".into(),
        };
        let wire = WireHashRule::from(&r);
        assert_eq!(wire.rule_type, 0);
        let back: HashRule = wire.try_into().unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn stream_marker_rejects_empty_pattern() {
        let wire = WireStreamMarkerRule {
            rule_id: 1,
            rule_content: base64_encode(&[]),
            rule_desc: "x".into(),
        };
        assert!(StreamMarkerRule::try_from(wire).is_err());
    }

    #[test]
    fn stream_marker_accepts_any_nonzero_length() {
        // §9: accept any byte length >= 1, not just 256.
        let wire = WireStreamMarkerRule {
            rule_id: 1,
            rule_content: base64_encode(&[0xAB]),
            rule_desc: "x".into(),
        };
        assert!(StreamMarkerRule::try_from(wire).is_ok());
    }
}
