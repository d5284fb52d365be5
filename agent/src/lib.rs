//! classifyd agent: process wiring for the detection pipeline, the
//! hybrid stores, and the heartbeat/command loop.
//!
//! Startup ordering (§9 design note, never as ambient globals):
//! identity → key → cipher → storage → stores → detectors →
//! heartbeat. [`Agent::bootstrap`] performs exactly this sequence and
//! returns a handle the binary can `run()` and, on shutdown, `stop()`.

pub mod config;
pub mod scanner;

use classifyd_core::crypto::sm4_cbc::{CipherError, KeyProvider};
use classifyd_core::crypto::LocalCipher;
use classifyd_core::identity::DeviceIdentity;
use classifyd_core::integrity::IntegrityMonitor;
use classifyd_core::monitors::{NetguardMonitor, Whitelist};
use classifyd_core::store::schema;
use classifyd_core::store::HybridStore;
use classifyd_detect::alert::HostMeta;
use classifyd_detect::manager::DetectorManager;
use classifyd_detect::policy::PolicyManager;
use classifyd_transport::command::{CommandResultReport, StrategyExecReport};
use classifyd_transport::dispatcher::CommandDispatcher;
use classifyd_transport::heartbeat::HeartbeatScheduler;
use classifyd_transport::reporter::ResultReporter;
use classifyd_transport::wire::{TlsConfig, WireClient};
use config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const ALERTS_TABLE: &str = "alerts";
const COMMAND_RESULT_TABLE: &str = "command_results";
const POLICY_RESULT_TABLE: &str = "policy_results";
const STORE_MEMORY_LIMIT: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("identity error: {0}")]
    Identity(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("policy error: {0}")]
    Policy(String),
}

/// Supplies the machine-bound key derived once at startup, so the
/// cipher never re-derives it per call.
struct MachineKeyProvider(Arc<classifyd_core::memory::GuardedKey16>);

impl KeyProvider for MachineKeyProvider {
    fn key(&self) -> Result<classifyd_core::memory::GuardedKey16, CipherError> {
        Ok((*self.0).clone())
    }
}

/// Every long-lived handle the running agent needs, constructed once
/// in the required order and owned for the process lifetime.
pub struct Agent {
    config: Config,
    identity: DeviceIdentity,
    dispatcher: Arc<CommandDispatcher>,
    reporter: Arc<ResultReporter>,
    heartbeat: Arc<HeartbeatScheduler>,
    alerts_store: Arc<HybridStore<classifyd_detect::alert::AlertRecord>>,
    integrity: Option<Arc<IntegrityMonitor>>,
    netguard: Option<NetguardMonitor>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Agent {
    /// identity → key → cipher → storage → stores → detectors →
    /// heartbeat, per the required startup order.
    pub async fn bootstrap(config: Config) -> Result<Self, BootstrapError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| BootstrapError::Storage(e.to_string()))?;

        // 1. identity
        let identity = DeviceIdentity::init(Some(&config.data_dir))
            .map_err(|e| BootstrapError::Identity(e.to_string()))?;

        // 2. key
        let key = Arc::new(identity.derive_key());

        // 3. cipher
        let cipher = Arc::new(LocalCipher::new(Box::new(MachineKeyProvider(key))));

        // 4. storage
        let db_path = config.data_dir.join("agent.db");
        let db = schema::open_database(&db_path)
            .await
            .map_err(|e| BootstrapError::Storage(e.to_string()))?;

        // 5. stores
        let alerts_store = Arc::new(
            HybridStore::new(&db, ALERTS_TABLE, STORE_MEMORY_LIMIT, Arc::clone(&cipher))
                .await
                .map_err(|e| BootstrapError::Storage(e.to_string()))?,
        );
        let command_store = Arc::new(
            HybridStore::new(&db, COMMAND_RESULT_TABLE, STORE_MEMORY_LIMIT, Arc::clone(&cipher))
                .await
                .map_err(|e| BootstrapError::Storage(e.to_string()))?,
        );
        let policy_store = Arc::new(
            HybridStore::new(&db, POLICY_RESULT_TABLE, STORE_MEMORY_LIMIT, Arc::clone(&cipher))
                .await
                .map_err(|e| BootstrapError::Storage(e.to_string()))?,
        );

        // 6. detectors, seeded from the persisted policy
        let policy = PolicyManager::load_or_init(&config.data_dir)
            .map_err(|e| BootstrapError::Policy(e.to_string()))?;
        let host = host_meta();
        let detectors = DetectorManager::new(host);
        detectors.set_hash_rules(policy.hash.rules());
        detectors.set_keyword_rules(policy.keyword.rules());
        detectors.set_stream_marker_rules(policy.secret_level.rules());
        detectors.set_electronic_marker_rules(policy.electronic.rules());
        if let Some(layout_rule) = policy.layout.rules().into_iter().next() {
            detectors.set_layout_rule(layout_rule);
        }

        // 7. transport (heartbeat last, once everything it can route
        // commands into already exists)
        let tls = TlsConfig {
            ca_path: config.server.ca_path.clone(),
            client_cert_path: config.server.client_cert_path.clone(),
            client_key_path: config.server.client_key_path.clone(),
        };
        let wire = Arc::new(
            WireClient::new(&config.server.base_url, &tls, Arc::clone(&cipher))
                .map_err(|e| BootstrapError::Transport(e.to_string()))?,
        );

        let reporter = Arc::new(ResultReporter::new(
            Arc::clone(&wire),
            user_agent_fn(identity.clone()),
            command_store,
            policy_store,
        ));

        let dispatcher = Arc::new(CommandDispatcher::new(policy, detectors, Arc::clone(&reporter)));

        let heartbeat = Arc::new(HeartbeatScheduler::new(
            Arc::clone(&wire),
            Arc::clone(&dispatcher),
            user_agent_fn(identity.clone()),
        ));

        let integrity = match std::env::current_exe() {
            Ok(exe) => match IntegrityMonitor::start(&exe, config.monitors.integrity_interval()) {
                Ok(m) => Some(Arc::new(m)),
                Err(e) => {
                    tracing::warn!(error = %e, "integrity monitor disabled: could not read own executable");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "integrity monitor disabled: could not resolve own executable path");
                None
            }
        };

        let target_pids = if config.monitors.netguard_target_pids.is_empty() {
            vec![std::process::id()]
        } else {
            config.monitors.netguard_target_pids.clone()
        };
        let whitelist = Whitelist::new(&config.monitors.netguard_whitelist);
        let netguard = Some(
            NetguardMonitor::new(target_pids, whitelist).with_interval(config.monitors.netguard_interval()),
        );

        Ok(Self {
            config,
            identity,
            dispatcher,
            reporter,
            heartbeat,
            alerts_store,
            integrity,
            netguard,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn alerts_store(&self) -> Arc<HybridStore<classifyd_detect::alert::AlertRecord>> {
        Arc::clone(&self.alerts_store)
    }

    /// Spawns the three long-lived loops (§5): heartbeat ticker,
    /// result-reporter retry ticker, and the worker pool driving
    /// sub-detector scans. The caller still owns feeding file paths
    /// into the returned [`scanner::WorkerPool`].
    pub fn run(&self, runtime: tokio::runtime::Handle) -> scanner::WorkerPool {
        let heartbeat = Arc::clone(&self.heartbeat);
        let heartbeat_interval = self.config.heartbeat.interval();
        let heartbeat_task = runtime.spawn(async move { heartbeat.start(heartbeat_interval).await });

        let reporter = Arc::clone(&self.reporter);
        let reporter_task = runtime.spawn(async move { reporter.run().await });

        {
            let mut tasks = self.tasks.lock().expect("task list lock poisoned");
            tasks.push(heartbeat_task);
            tasks.push(reporter_task);
        }

        if let Some(integrity) = self.integrity.as_ref() {
            self.spawn_integrity_loop(integrity.interval(), &runtime);
        }
        if let Some(netguard) = &self.netguard {
            self.spawn_netguard_loop(netguard.interval(), &runtime);
        }

        scanner::WorkerPool::spawn(
            self.config.scanner.worker_count(),
            self.config.scanner.scan_deadline(),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.alerts_store),
            runtime,
        )
    }

    fn spawn_integrity_loop(&self, interval: Duration, runtime: &tokio::runtime::Handle) {
        // The baseline is captured once, in `bootstrap`, and never
        // re-anchored: rebuilding `IntegrityMonitor` on every tick would
        // make a modification invisible by folding it into the new
        // baseline instead of comparing against the original.
        let Some(monitor) = self.integrity.as_ref().map(Arc::clone) else {
            return;
        };
        let reporter = Arc::clone(&self.reporter);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(violation) = monitor.check() {
                    tracing::error!(%violation, "integrity violation detected");
                    reporter
                        .report_command_result(CommandResultReport::failed(
                            "integrity_monitor",
                            vec![violation.to_string()],
                        ))
                        .await;
                }
            }
        });
        self.tasks.lock().expect("task list lock poisoned").push(task);
    }

    fn spawn_netguard_loop(&self, interval: Duration, runtime: &tokio::runtime::Handle) {
        if self.netguard.is_none() {
            return;
        }
        let whitelist_entries = self.config.monitors.netguard_whitelist.clone();
        let target_pids = if self.config.monitors.netguard_target_pids.is_empty() {
            vec![std::process::id()]
        } else {
            self.config.monitors.netguard_target_pids.clone()
        };
        let reporter = Arc::clone(&self.reporter);
        let task = runtime.spawn(async move {
            let mut monitor =
                NetguardMonitor::new(target_pids, Whitelist::new(&whitelist_entries)).with_interval(interval);
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for alert in monitor.scan() {
                    tracing::warn!(remote = %alert.remote, port = alert.remote_port, "netguard alert");
                    if let Err(e) = classifyd_core::monitors::netguard::enforce_block(&alert.remote) {
                        tracing::warn!(error = %e, remote = %alert.remote, "netguard enforcement failed");
                    }
                    reporter
                        .report_command_result(CommandResultReport::failed(
                            "netguard_monitor",
                            vec![format!("{:?} {}:{} pid={:?}", alert.proto, alert.remote, alert.remote_port, alert.pid)],
                        ))
                        .await;
                }
            }
        });
        self.tasks.lock().expect("task list lock poisoned").push(task);
    }

    /// Stops the heartbeat and reporter loops, joins every spawned
    /// task, then flushes every hybrid store's in-memory buffer to
    /// disk so no buffered alert or cached report is lost.
    pub async fn shutdown(&self) {
        self.heartbeat.stop();
        self.reporter.stop();

        let tasks = {
            let mut guard = self.tasks.lock().expect("task list lock poisoned");
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            let _ = task.await;
        }

        if let Err(e) = self.alerts_store.flush_memory_to_disk().await {
            tracing::error!(error = %e, "failed to flush alerts store on shutdown");
        }
        self.reporter.flush().await;
    }
}

fn user_agent_fn(identity: DeviceIdentity) -> impl Fn() -> String + Send + Sync + 'static {
    move || identity.user_agent()
}

fn host_meta() -> HostMeta {
    let host_name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let user_name = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    HostMeta {
        host_name,
        user_name,
        org: String::new(),
        company: String::new(),
    }
}

/// App-level events the agent emits; `core` handles logging, never UI.
pub trait AppEvent {
    fn event_name(&self) -> &'static str;
}

pub use classifyd_core::memory::GuardedKey16;
