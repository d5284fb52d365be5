//! §3/§4.7/§4.8/§4.9 wire payloads carried over the heartbeat channel.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// §4.7 decoded from a heartbeat response; §4.8 dispatched on `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub cmd: String,
    pub cmd_id: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub submodule: Vec<String>,
    #[serde(default, alias = "config")]
    pub param: serde_json::Value,
}

/// Accepts either a bare string or a JSON array of strings for
/// `submodule`, since `startm`/`stopm` may target one or several
/// sub-detectors in a single payload.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::String(s) => Ok(vec![s]),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => Ok(s),
                other => Err(de::Error::custom(format!("expected string, got {other}"))),
            })
            .collect(),
        other => Err(de::Error::custom(format!(
            "expected string or array for submodule, got {other}"
        ))),
    }
}

/// §4.8 `startm`/`stopm`/`file_detect_audit_log`/`uninstall`/`update`/
/// `inner_policy_update` outcome, posted to `command_result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultReport {
    pub cmd_id: String,
    /// `0` when every targeted submodule succeeded, `1` otherwise.
    pub result: i32,
    pub detail: Vec<String>,
}

impl CommandResultReport {
    pub fn ok(cmd_id: &str, detail: Vec<String>) -> Self {
        Self {
            cmd_id: cmd_id.to_string(),
            result: 0,
            detail,
        }
    }

    pub fn failed(cmd_id: &str, detail: Vec<String>) -> Self {
        Self {
            cmd_id: cmd_id.to_string(),
            result: 1,
            detail,
        }
    }
}

/// A single rejected rule in a policy apply, with its reason — §4.8's
/// `failed_ids[with reason]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: i64,
    pub reason: String,
}

/// §4.9 `report_policy_result` payload, posted to `policy_result`.
/// Idempotency key is `(module, version)` per §4.9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyExecReport {
    pub module: String,
    pub version: i64,
    pub success_ids: Vec<i64>,
    pub failed_ids: Vec<RuleOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scenario_5_policy_payload() {
        let raw = r#"{
            "type": "policy",
            "module": "md5_detect",
            "cmd": "add",
            "cmd_id": "abc123",
            "config": {"rules": [{"rule_id": 1, "rule_type": 0, "rule_content": "aaaa", "rule_desc": "x"}]}
        }"#;
        let payload: CommandPayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.kind, "policy");
        assert_eq!(payload.module.as_deref(), Some("md5_detect"));
        assert!(payload.param.get("rules").is_some());
    }

    #[test]
    fn decodes_single_and_multiple_submodules() {
        let single: CommandPayload = serde_json::from_str(
            r#"{"type":"command","cmd":"startm","cmd_id":"1","submodule":"keyword_detect"}"#,
        )
        .unwrap();
        assert_eq!(single.submodule, vec!["keyword_detect".to_string()]);

        let many: CommandPayload = serde_json::from_str(
            r#"{"type":"command","cmd":"startm","cmd_id":"1","submodule":["keyword_detect","md5_detect"]}"#,
        )
        .unwrap();
        assert_eq!(
            many.submodule,
            vec!["keyword_detect".to_string(), "md5_detect".to_string()]
        );
    }

    #[test]
    fn missing_submodule_defaults_empty() {
        let payload: CommandPayload =
            serde_json::from_str(r#"{"type":"command","cmd":"uninstall","cmd_id":"1"}"#).unwrap();
        assert!(payload.submodule.is_empty());
    }
}
