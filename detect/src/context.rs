//! §5 cancellation: an explicit context value carrying a deadline and a
//! cancelled flag, checked at every blocking operation boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ScanContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl ScanContext {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Instant::now() + deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn default_deadline() -> Self {
        Self::with_deadline(DEFAULT_DEADLINE)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancelled explicitly or the deadline has elapsed.
    /// Sub-detectors must check this at every block boundary.
    pub fn is_done(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flips_is_done() {
        let ctx = ScanContext::default_deadline();
        assert!(!ctx.is_done());
        ctx.cancel();
        assert!(ctx.is_done());
    }

    #[test]
    fn deadline_elapses() {
        let ctx = ScanContext::with_deadline(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(ctx.is_done());
    }
}
