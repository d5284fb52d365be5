//! `classifyd` daemon entry point: loads the config, bootstraps the
//! agent in the required startup order, and runs until a termination
//! signal arrives.

use classifyd_agent::config::Config;
use classifyd_agent::Agent;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_PATH: &str = "/etc/classifyd/agent.toml";

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_env_filter(env_filter)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("logging subscriber already set, continuing with the existing one");
    }
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn main() {
    init_logging();

    let path = config_path();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config at {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to build async runtime: {e}");
            std::process::exit(1);
        }
    };

    let agent = match runtime.block_on(Agent::bootstrap(config)) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("failed to bootstrap agent: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        device_id = %agent.identity().device_id(),
        "classifyd agent starting"
    );

    let worker_pool = agent.run(runtime.handle().clone());

    let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .expect("failed to install signal handler");
    let _ = shutdown_rx.recv();

    tracing::info!("shutdown signal received, draining in-flight work");
    worker_pool.shutdown();
    runtime.block_on(agent.shutdown());
}
