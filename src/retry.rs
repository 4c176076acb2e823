//! Background re-delivery of unacknowledged broadcasts
//!
//! On every tick the scheduler re-sends each pending (message, neighbor)
//! pair. There is no backoff and no attempt limit: a pair is retried until
//! its neighbor acknowledges it or the process exits. This one loop covers
//! dropped sends, dropped acknowledgments and partitions alike.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::broadcast::BroadcastEngine;

/// Configuration for the retry scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Interval between retry passes
    pub interval: Duration,
    /// How long a send's correlation entry is kept waiting for a response
    pub rpc_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

/// Fixed-interval re-sender of pending pairs
pub struct RetryScheduler {
    engine: Arc<BroadcastEngine>,
    config: RetryConfig,
}

impl RetryScheduler {
    /// Create a scheduler re-sending through `engine`
    pub fn new(engine: Arc<BroadcastEngine>, config: RetryConfig) -> Self {
        Self { engine, config }
    }

    /// Run one retry pass; returns how many sends were issued
    pub async fn tick(&self) -> usize {
        let expired = self
            .engine
            .outbox()
            .rpcs()
            .expire(self.config.rpc_timeout)
            .await;
        let resent = self.engine.resend_pending().await;

        if resent > 0 || expired > 0 {
            debug!(resent, expired, "Retry pass complete");
        }
        resent
    }

    /// Tick forever
    pub async fn run(self) {
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick of a tokio interval fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// Start the scheduler on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
