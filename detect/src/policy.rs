//! §4.6 Policy Manager: load, merge (add/del/reset), and atomically
//! persist rule sets, one file per module.
//!
//! Rules are read-mostly shared state behind a read-write lock per
//! module; `apply` publishes a new sorted snapshot atomically so
//! readers (sub-detectors) never observe a half-applied merge.

use crate::error::PolicyError;
use crate::rules::{
    ElectronicMarkerRule, HashRule, LayoutRule, MarkerRule, RuleId, StreamMarkerRule, WireRule,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOp {
    Add,
    Del,
    Reset,
}

impl std::str::FromStr for MergeOp {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(MergeOp::Add),
            "del" => Ok(MergeOp::Del),
            "reset" => Ok(MergeOp::Reset),
            other => Err(PolicyError::MalformedRule(format!("unknown op {other}"))),
        }
    }
}

/// §4.8 per-rule apply outcome, reported via the Result Reporter.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub success_ids: Vec<i64>,
    pub failed_ids: Vec<(i64, String)>,
}

/// A single module's persisted, read-mostly rule set.
pub struct RuleStore<R> {
    path: PathBuf,
    rules: RwLock<Vec<R>>,
}

impl<R> RuleStore<R>
where
    R: WireRule + RuleId + Clone,
{
    pub fn load_or_init(path: &Path) -> Result<Self, PolicyError> {
        let rules = match fs::read_to_string(path) {
            Ok(contents) => decode_rule_file::<R>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(PolicyError::Io(e.to_string())),
        };
        Ok(Self {
            path: path.to_path_buf(),
            rules: RwLock::new(sorted(rules)),
        })
    }

    /// Current in-memory snapshot.
    pub fn rules(&self) -> Vec<R> {
        self.rules.read().expect("rule lock poisoned").clone()
    }

    /// §4.6 `apply`: merge, re-sort, and persist atomically. Returns
    /// per-rule_id success/failure (failures only possible on `add`,
    /// when the incoming payload's wire form doesn't parse upstream of
    /// this call).
    pub fn apply(&self, op: MergeOp, incoming: Vec<R>) -> Result<(), PolicyError> {
        let mut guard = self.rules.write().expect("rule lock poisoned");

        let merged = match op {
            MergeOp::Reset => incoming,
            MergeOp::Add => {
                let mut by_id: HashMap<i64, R> =
                    guard.iter().cloned().map(|r| (r.rule_id(), r)).collect();
                for r in incoming {
                    by_id.insert(r.rule_id(), r);
                }
                by_id.into_values().collect()
            }
            MergeOp::Del => {
                let remove: std::collections::HashSet<i64> =
                    incoming.iter().map(|r| r.rule_id()).collect();
                guard
                    .iter()
                    .cloned()
                    .filter(|r| !remove.contains(&r.rule_id()))
                    .collect()
            }
        };

        let merged = sorted(merged);
        persist(&self.path, &merged)?;
        *guard = merged;
        Ok(())
    }
}

fn sorted<R: RuleId>(mut rules: Vec<R>) -> Vec<R> {
    rules.sort_by_key(|r| r.rule_id());
    rules
}

#[derive(serde::Serialize, serde::Deserialize)]
struct RuleFile<W> {
    rules: Vec<W>,
}

/// §6: on read, accept `{"rules":[...]}` or a bare `[...]`.
fn decode_rule_file<R: WireRule>(contents: &str) -> Result<Vec<R>, PolicyError> {
    let value: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| PolicyError::Serde(e.to_string()))?;

    let wires: Vec<R::Wire> = if value.is_array() {
        serde_json::from_value(value).map_err(|e| PolicyError::Serde(e.to_string()))?
    } else {
        let file: RuleFile<R::Wire> =
            serde_json::from_value(value).map_err(|e| PolicyError::Serde(e.to_string()))?;
        file.rules
    };

    wires
        .into_iter()
        .map(|w| R::from_wire(w).map_err(PolicyError::MalformedRule))
        .collect()
}

/// §6: writes always use the wrapped form, pretty-printed with
/// two-space indent; §4.6: write to `<path>.tmp`, fsync, rename.
fn persist<R: WireRule + Clone>(path: &Path, rules: &[R]) -> Result<(), PolicyError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PolicyError::Io(e.to_string()))?;
    }

    let file = RuleFile {
        rules: rules.iter().map(|r| r.to_wire()).collect::<Vec<_>>(),
    };
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(
        &mut buf,
        serde_json::ser::PrettyFormatter::with_indent(b"  "),
    );
    serde::Serialize::serialize(&file, &mut ser).map_err(|e| PolicyError::Serde(e.to_string()))?;

    let tmp_path = path.with_extension("tmp");
    {
        use std::io::Write;
        let mut f = fs::File::create(&tmp_path).map_err(|e| PolicyError::Io(e.to_string()))?;
        f.write_all(&buf).map_err(|e| PolicyError::Io(e.to_string()))?;
        f.sync_all().map_err(|e| PolicyError::Io(e.to_string()))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| PolicyError::Io(e.to_string()))?;
    Ok(())
}

/// §4.8 fixed policy module set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    KeywordDetect,
    Md5Detect,
    SecretLevelDetect,
    ElectronicSecretDetect,
    OfficialFormatDetect,
}

impl std::str::FromStr for Module {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword_detect" => Ok(Module::KeywordDetect),
            "md5_detect" => Ok(Module::Md5Detect),
            "secret_level_detect" => Ok(Module::SecretLevelDetect),
            "electronic_secret_detect" => Ok(Module::ElectronicSecretDetect),
            "official_format_detect" => Ok(Module::OfficialFormatDetect),
            other => Err(PolicyError::UnknownModule(other.to_string())),
        }
    }
}

/// Owns one [`RuleStore`] per module.
pub struct PolicyManager {
    pub hash: RuleStore<HashRule>,
    pub keyword: RuleStore<MarkerRule>,
    pub secret_level: RuleStore<StreamMarkerRule>,
    pub electronic: RuleStore<ElectronicMarkerRule>,
    pub layout: RuleStore<LayoutRule>,
}

impl PolicyManager {
    pub fn load_or_init(data_dir: &Path) -> Result<Self, PolicyError> {
        Ok(Self {
            hash: RuleStore::load_or_init(&data_dir.join("md5_detect_policy.json"))?,
            keyword: RuleStore::load_or_init(&data_dir.join("keyword_detect_policy.json"))?,
            secret_level: RuleStore::load_or_init(&data_dir.join("secret_level_detect_policy.json"))?,
            electronic: RuleStore::load_or_init(&data_dir.join("electronic_secret_detect_policy.json"))?,
            layout: RuleStore::load_or_init(&data_dir.join("official_format_detect_policy.json"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{HashType, SizeFilter};
    use tempfile::tempdir;

    fn hr(id: i64, value: &str) -> HashRule {
        HashRule {
            rule_id: id,
            hash_type: HashType::Md5,
            hash_value: value.to_string(),
            description: "d".to_string(),
        }
    }

    #[test]
    fn scenario_5_add_overrides_same_rule_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("md5_detect_policy.json");
        let store: RuleStore<HashRule> = RuleStore::load_or_init(&path).unwrap();

        store.apply(MergeOp::Add, vec![hr(1, "aaaa")]).unwrap();
        store.apply(MergeOp::Add, vec![hr(1, "bbbb")]).unwrap();

        let rules = store.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].hash_value, "bbbb");
    }

    #[test]
    fn reset_add_del_yields_expected_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.json");
        let store: RuleStore<HashRule> = RuleStore::load_or_init(&path).unwrap();

        store
            .apply(MergeOp::Reset, vec![hr(1, "a"), hr(2, "b")])
            .unwrap();
        store.apply(MergeOp::Add, vec![hr(3, "c")]).unwrap();
        store.apply(MergeOp::Del, vec![hr(2, "")]).unwrap();

        let ids: Vec<i64> = store.rules().iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn persisted_file_matches_in_memory_view() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.json");
        let store: RuleStore<HashRule> = RuleStore::load_or_init(&path).unwrap();
        store.apply(MergeOp::Reset, vec![hr(5, "deadbeef")]).unwrap();

        let reloaded: RuleStore<HashRule> = RuleStore::load_or_init(&path).unwrap();
        assert_eq!(reloaded.rules(), store.rules());
    }

    #[test]
    fn accepts_bare_array_or_wrapped_form() {
        let dir = tempdir().unwrap();

        let bare_path = dir.path().join("bare.json");
        fs::write(
            &bare_path,
            r#"[{"rule_id":1,"rule_type":0,"rule_content":"aa","rule_desc":"x"}]"#,
        )
        .unwrap();
        let bare: RuleStore<HashRule> = RuleStore::load_or_init(&bare_path).unwrap();
        assert_eq!(bare.rules().len(), 1);

        let wrapped_path = dir.path().join("wrapped.json");
        fs::write(
            &wrapped_path,
            r#"{"rules":[{"rule_id":1,"rule_type":0,"rule_content":"aa","rule_desc":"x"}]}"#,
        )
        .unwrap();
        let wrapped: RuleStore<HashRule> = RuleStore::load_or_init(&wrapped_path).unwrap();
        assert_eq!(wrapped.rules().len(), 1);
    }

    #[test]
    fn marker_rule_size_filter_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kw.json");
        let store: RuleStore<MarkerRule> = RuleStore::load_or_init(&path).unwrap();
        store
            .apply(
                MergeOp::Reset,
                vec![MarkerRule {
                    rule_id: 1,
                    pattern_text: "confidential".into(),
                    sensitivity_level: 3,
                    file_type_filter: vec!["txt".into()],
                    size_filter: SizeFilter { min: 0, max: 1024 },
                    description: "kw".into(),
                }],
            )
            .unwrap();

        let reloaded: RuleStore<MarkerRule> = RuleStore::load_or_init(&path).unwrap();
        assert_eq!(reloaded.rules()[0].size_filter.max, 1024);
    }
}
