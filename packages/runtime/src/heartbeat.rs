//! Keeps a handed-off lock alive while its job runs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use queue_core::{JobId, Lock, QueueEvent};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Checks per TTL window.
const CHECKS_PER_TTL: u32 = 4;

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Background task that extends a lock once less than half its TTL remains.
pub struct Heartbeat {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Start beating for `lock`. Locks without a TTL never expire and get no heartbeat.
    pub fn start(
        lock: Arc<dyn Lock>,
        job_id: JobId,
        events: broadcast::Sender<QueueEvent>,
    ) -> Option<Self> {
        let ttl = lock.ttl()?;
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run(lock, ttl, job_id, events, stop_rx));
        Some(Self {
            stop: Some(stop),
            handle,
        })
    }

    /// Stop beating and wait for any in-flight check to wind down.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!("Heartbeat task ended abnormally: {}", e);
        }
    }
}

fn check_interval(ttl: Duration) -> Duration {
    (ttl / CHECKS_PER_TTL).max(MIN_CHECK_INTERVAL)
}

async fn run(
    lock: Arc<dyn Lock>,
    ttl: Duration,
    job_id: JobId,
    events: broadcast::Sender<QueueEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let threshold = ttl / 2;
    let mut ticker = tokio::time::interval(check_interval(ttl));
    // One extension at a time: ticks that fall due while extending are dropped.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let remaining = lock.remaining_time().unwrap_or(Duration::ZERO);
        if remaining >= threshold {
            continue;
        }

        tokio::select! {
            _ = &mut stop => break,
            result = lock.extend(Some(ttl)) => match result {
                Ok(()) => {
                    tracing::trace!(
                        id = %job_id,
                        key = lock.key(),
                        ?remaining,
                        "Extended lock"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        id = %job_id,
                        key = lock.key(),
                        error = %e,
                        "Failed to extend lock, job keeps running unprotected"
                    );
                    let _ = events.send(QueueEvent::LockExtensionFailed {
                        job_id,
                        key: lock.key().to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }
}
