//! §4.8 Command Dispatcher: branches on `CommandPayload.type`, routes
//! policy payloads to the Policy Manager and command payloads to the
//! Detector Manager, and reports every outcome through the Result
//! Reporter.

use crate::command::{CommandPayload, CommandResultReport, RuleOutcome, StrategyExecReport};
use crate::reporter::ResultReporter;
use classifyd_detect::alert::AlertLogItem;
use classifyd_detect::manager::{DetectorManager, Module as DetectorModule};
use classifyd_detect::policy::{ApplyOutcome, MergeOp, Module as PolicyModule, PolicyManager};
use classifyd_detect::rules::{
    ElectronicMarkerRule, HashRule, LayoutRule, MarkerRule, RuleId, StreamMarkerRule, WireRule,
};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// §4.8's fixed submodule-name table, right-hand side — the names
/// `startm`/`stopm` payloads actually carry.
fn submodule_to_detector(name: &str) -> Option<DetectorModule> {
    match name {
        "keyword_detect" => Some(DetectorModule::Keyword),
        "file_hash_detect" => Some(DetectorModule::Hash),
        "electronic_secret_detect" => Some(DetectorModule::ElectronicMarker),
        "security_classification_level" => Some(DetectorModule::ElectronicMarker),
        "secret_level_detect" => Some(DetectorModule::StreamMarker),
        "official_format_detect" => Some(DetectorModule::Layout),
        _ => None,
    }
}

pub struct CommandDispatcher {
    policy: PolicyManager,
    detectors: DetectorManager,
    reporter: Arc<ResultReporter>,
    audit_log: Mutex<Vec<AlertLogItem>>,
}

impl CommandDispatcher {
    pub fn new(policy: PolicyManager, detectors: DetectorManager, reporter: Arc<ResultReporter>) -> Self {
        Self {
            policy,
            detectors,
            reporter,
            audit_log: Mutex::new(Vec::new()),
        }
    }

    pub fn detectors(&self) -> &DetectorManager {
        &self.detectors
    }

    /// Recorded by the caller (the agent's worker pool) after every
    /// scan, regardless of hit/miss, so `file_detect_audit_log` has
    /// something to report.
    pub fn push_audit_log(&self, item: AlertLogItem) {
        self.audit_log.lock().expect("audit log lock poisoned").push(item);
    }

    pub async fn dispatch(&self, payload: CommandPayload) {
        match payload.kind.as_str() {
            "policy" => self.dispatch_policy(payload).await,
            "command" => self.dispatch_command(payload).await,
            other => {
                tracing::warn!(kind = %other, "ignoring command payload of unknown type");
            }
        }
    }

    async fn dispatch_policy(&self, payload: CommandPayload) {
        let Some(module_name) = payload.module.as_deref() else {
            tracing::warn!("policy payload missing module name");
            return;
        };
        let Ok(module) = PolicyModule::from_str(module_name) else {
            tracing::warn!(module = %module_name, "ignoring policy payload for unknown module");
            return;
        };
        let Ok(op) = MergeOp::from_str(&payload.cmd) else {
            tracing::warn!(cmd = %payload.cmd, "ignoring policy payload with unknown merge op");
            return;
        };

        let outcome = match module {
            PolicyModule::Md5Detect => apply_wire_rules::<HashRule>(&self.policy.hash, op, &payload.param),
            PolicyModule::KeywordDetect => {
                apply_wire_rules::<MarkerRule>(&self.policy.keyword, op, &payload.param)
            }
            PolicyModule::SecretLevelDetect => {
                apply_wire_rules::<StreamMarkerRule>(&self.policy.secret_level, op, &payload.param)
            }
            PolicyModule::ElectronicSecretDetect => {
                apply_wire_rules::<ElectronicMarkerRule>(&self.policy.electronic, op, &payload.param)
            }
            PolicyModule::OfficialFormatDetect => {
                apply_wire_rules::<LayoutRule>(&self.policy.layout, op, &payload.param)
            }
        };

        self.refresh_detector_rules(module);

        let report = StrategyExecReport {
            module: module_name.to_string(),
            version: now_epoch_secs(),
            success_ids: outcome.success_ids,
            failed_ids: outcome
                .failed_ids
                .into_iter()
                .map(|(rule_id, reason)| RuleOutcome { rule_id, reason })
                .collect(),
        };
        self.reporter.report_policy_result(report).await;
    }

    /// After a successful merge, publish the freshly persisted rule
    /// set into the live detector so readers never see the old rules.
    fn refresh_detector_rules(&self, module: PolicyModule) {
        match module {
            PolicyModule::Md5Detect => self.detectors.set_hash_rules(self.policy.hash.rules()),
            PolicyModule::KeywordDetect => {
                self.detectors.set_keyword_rules(self.policy.keyword.rules())
            }
            PolicyModule::SecretLevelDetect => self
                .detectors
                .set_stream_marker_rules(self.policy.secret_level.rules()),
            PolicyModule::ElectronicSecretDetect => self
                .detectors
                .set_electronic_marker_rules(self.policy.electronic.rules()),
            PolicyModule::OfficialFormatDetect => {
                let rule = self.policy.layout.rules().into_iter().next().unwrap_or_default();
                self.detectors.set_layout_rule(rule);
            }
        }
    }

    async fn dispatch_command(&self, payload: CommandPayload) {
        match payload.cmd.as_str() {
            "startm" => self.toggle_modules(&payload, true).await,
            "stopm" => self.toggle_modules(&payload, false).await,
            "file_detect_audit_log" => self.report_audit_log(&payload.cmd_id).await,
            "uninstall" | "update" | "inner_policy_update" => {
                // Placeholders upstream: the reporting contract is all
                // that's specified, not the effect.
                self.reporter
                    .report_command_result(CommandResultReport::ok(&payload.cmd_id, Vec::new()))
                    .await;
            }
            other => {
                tracing::warn!(cmd = %other, "ignoring command payload with unknown cmd");
            }
        }
    }

    async fn toggle_modules(&self, payload: &CommandPayload, enable: bool) {
        let mut detail = Vec::new();
        let mut all_ok = true;

        for name in &payload.submodule {
            match submodule_to_detector(name) {
                Some(module) => {
                    if enable {
                        self.detectors.enable(module);
                    } else {
                        self.detectors.disable(module);
                    }
                    detail.push(format!("{name}: ok"));
                }
                None => {
                    tracing::warn!(submodule = %name, "skipping unknown submodule name");
                    detail.push(format!("{name}: unknown submodule, skipped"));
                }
            }
        }

        if payload.submodule.is_empty() {
            all_ok = false;
            detail.push("no submodule named".to_string());
        }

        let report = if all_ok {
            CommandResultReport::ok(&payload.cmd_id, detail)
        } else {
            CommandResultReport::failed(&payload.cmd_id, detail)
        };
        self.reporter.report_command_result(report).await;
    }

    async fn report_audit_log(&self, cmd_id: &str) {
        let items = {
            let mut log = self.audit_log.lock().expect("audit log lock poisoned");
            std::mem::take(&mut *log)
        };
        let detail = items
            .iter()
            .map(|i| serde_json::to_string(i).unwrap_or_default())
            .collect();
        self.reporter
            .report_command_result(CommandResultReport::ok(cmd_id, detail))
            .await;
    }
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parses the policy-update payload's rule list (either `{"rules":[...]}`
/// or a bare array, per §6) against one module's wire rule type,
/// converts each to its domain rule, and applies the merge. Per-item
/// failures (parse or domain-validation) are reported with the best
/// `rule_id` recoverable from the raw JSON, defaulting to `0`.
fn apply_wire_rules<R>(
    store: &classifyd_detect::policy::RuleStore<R>,
    op: MergeOp,
    raw: &serde_json::Value,
) -> ApplyOutcome
where
    R: WireRule + RuleId + Clone,
    R::Wire: serde::de::DeserializeOwned,
{
    let mut outcome = ApplyOutcome::default();
    let mut domain_rules = Vec::new();

    for item in extract_items(raw) {
        let rule_id = item.get("rule_id").and_then(|v| v.as_i64()).unwrap_or(0);
        match serde_json::from_value::<R::Wire>(item.clone()) {
            Ok(wire) => match R::from_wire(wire) {
                Ok(domain) => {
                    outcome.success_ids.push(domain.rule_id());
                    domain_rules.push(domain);
                }
                Err(e) => outcome.failed_ids.push((rule_id, e)),
            },
            Err(e) => outcome.failed_ids.push((rule_id, e.to_string())),
        }
    }

    if let Err(e) = store.apply(op, domain_rules) {
        for id in std::mem::take(&mut outcome.success_ids) {
            outcome.failed_ids.push((id, e.to_string()));
        }
    }

    outcome
}

fn extract_items(raw: &serde_json::Value) -> Vec<serde_json::Value> {
    if let Some(arr) = raw.as_array() {
        return arr.clone();
    }
    if let Some(rules) = raw.get("rules").and_then(|v| v.as_array()) {
        return rules.clone();
    }
    Vec::new()
}
