use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use cater_core::outbox::OutboxStore;
use cater_core::CoreResult;

use crate::mirror::MirrorSync;

/// Exponential backoff for outbox retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed before an entry is buried
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// initial_delay * multiplier^(attempt - 1), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub completed: usize,
    pub retried: usize,
    pub buried: usize,
}

/// Background replay of mirror writes parked in the outbox.
pub struct MirrorWorker {
    mirror: Arc<MirrorSync>,
    outbox: Arc<dyn OutboxStore>,
    policy: RetryPolicy,
    batch_size: u32,
    poll_interval: Duration,
}

impl MirrorWorker {
    pub fn new(
        mirror: Arc<MirrorSync>,
        outbox: Arc<dyn OutboxStore>,
        policy: RetryPolicy,
        batch_size: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            mirror,
            outbox,
            policy,
            batch_size,
            poll_interval,
        }
    }

    /// Process one batch of due entries.
    pub async fn run_once(&self) -> CoreResult<DrainStats> {
        let mut stats = DrainStats::default();
        for entry in self.outbox.claim_due(self.batch_size).await? {
            match self.mirror.apply(&entry.task).await {
                Ok(()) => {
                    self.outbox.complete(entry.id).await?;
                    stats.completed += 1;
                }
                Err(err) => {
                    let attempts = entry.attempts + 1;
                    let message = err.to_string();
                    if attempts >= self.policy.max_attempts {
                        error!(
                            consistency_gap = true,
                            outbox_id = %entry.id,
                            task = entry.task.kind(),
                            attempts,
                            "Mirror task exhausted retries: {}",
                            message
                        );
                        self.outbox.bury(entry.id, attempts, &message).await?;
                        stats.buried += 1;
                    } else {
                        let delay = self.policy.delay_for_attempt(attempts);
                        let next =
                            Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                        warn!(
                            outbox_id = %entry.id,
                            task = entry.task.kind(),
                            attempts,
                            "Mirror task failed, retrying in {:?}: {}",
                            delay,
                            message
                        );
                        self.outbox
                            .reschedule(entry.id, attempts, next, &message)
                            .await?;
                        stats.retried += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    pub async fn run(self) {
        info!("Mirror worker started, polling every {:?}", self.poll_interval);
        loop {
            match self.run_once().await {
                Ok(stats) if stats != DrainStats::default() => {
                    info!(
                        completed = stats.completed,
                        retried = stats.retried,
                        buried = stats.buried,
                        "Outbox batch processed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Outbox poll failed: {}", e),
            }
            sleep(self.poll_interval).await;
        }
    }
}
