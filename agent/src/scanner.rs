//! §5 worker pool: a bounded `std::sync::mpsc` channel of file paths
//! feeds `workers` OS threads running `DetectorManager::detect`;
//! results flow back through a second bounded channel a single
//! collector thread drains.

use classifyd_core::store::HybridStore;
use classifyd_detect::alert::{AlertLogItem, AlertRecord};
use classifyd_detect::context::ScanContext;
use classifyd_transport::CommandDispatcher;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct ScanOutcome {
    alert: Option<AlertRecord>,
    log: Option<AlertLogItem>,
}

/// Owns the worker and collector threads; [`WorkerPool::shutdown`]
/// closes the input channel and joins everything so no in-flight
/// result is lost before the caller flushes the hybrid stores.
pub struct WorkerPool {
    input: SyncSender<PathBuf>,
    workers: Vec<JoinHandle<()>>,
    collector: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        worker_count: usize,
        scan_deadline: Duration,
        dispatcher: Arc<CommandDispatcher>,
        alerts_store: Arc<HybridStore<AlertRecord>>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let (input_tx, input_rx) = sync_channel::<PathBuf>(2 * worker_count);
        let (result_tx, result_rx) = sync_channel::<ScanOutcome>(2 * worker_count);
        let input_rx = Arc::new(Mutex::new(input_rx));

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let input_rx = Arc::clone(&input_rx);
            let result_tx = result_tx.clone();
            let dispatcher = Arc::clone(&dispatcher);
            workers.push(thread::spawn(move || {
                worker_loop(input_rx, result_tx, dispatcher, scan_deadline)
            }));
        }
        drop(result_tx);

        let collector_dispatcher = Arc::clone(&dispatcher);
        let collector = thread::spawn(move || {
            collector_loop(result_rx, alerts_store, collector_dispatcher, runtime)
        });

        Self {
            input: input_tx,
            workers,
            collector: Some(collector),
        }
    }

    /// Feed one path into the pool. Blocks if the input channel (sized
    /// `2 * workers`) is full, providing natural backpressure.
    pub fn submit(&self, path: PathBuf) {
        if self.input.send(path).is_err() {
            tracing::error!("worker pool input channel closed, dropping scan request");
        }
    }

    /// Closes the input channel and joins every worker and the
    /// collector, so the caller can safely flush hybrid stores after
    /// this returns.
    pub fn shutdown(mut self) {
        drop(self.input);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(collector) = self.collector.take() {
            let _ = collector.join();
        }
    }
}

fn worker_loop(
    input_rx: Arc<Mutex<Receiver<PathBuf>>>,
    result_tx: SyncSender<ScanOutcome>,
    dispatcher: Arc<CommandDispatcher>,
    scan_deadline: Duration,
) {
    loop {
        let path = {
            let rx = input_rx.lock().expect("worker input lock poisoned");
            rx.recv()
        };
        let Ok(path) = path else {
            break;
        };

        let ctx = ScanContext::with_deadline(scan_deadline);
        let (_hit, alert, log) = dispatcher.detectors().detect(&ctx, &path);
        if result_tx.send(ScanOutcome { alert, log }).is_err() {
            break;
        }
    }
}

fn collector_loop(
    result_rx: Receiver<ScanOutcome>,
    alerts_store: Arc<HybridStore<AlertRecord>>,
    dispatcher: Arc<CommandDispatcher>,
    runtime: tokio::runtime::Handle,
) {
    while let Ok(outcome) = result_rx.recv() {
        if let Some(log) = outcome.log {
            dispatcher.push_audit_log(log);
        }

        if let Some(alert) = outcome.alert {
            tracing::warn!(rule_id = alert.rule_id, file = %alert.file_path, "detection hit");
            runtime.block_on(async {
                if let Err(e) = alerts_store.push(alert).await {
                    tracing::error!(error = %e, "failed to persist alert record");
                }
            });
        }
    }
}
