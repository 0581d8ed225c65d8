#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use queue_core::{
    ConnectionSettings, JobError, Lock, LockError, LockProvider, MemoryLockProvider, QueueSettings,
    SerializedLock, WorkerOptions,
};
use queue_core::lock::LockFuture;
use queue_runtime::{FnHandler, JobContext, JobHandler};
use serde_json::Value;

/// Tracks how many executions of a handler run at once.
#[derive(Clone, Default)]
pub struct Probe {
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// A handler for `job_type` that sleeps for `delay` while being counted.
    pub fn handler(&self, job_type: &str, delay: Duration) -> Arc<dyn JobHandler> {
        let probe = self.clone();
        Arc::new(FnHandler::new(job_type, move |_ctx: JobContext, _payload: Value| {
            let probe = probe.clone();
            async move {
                probe.started.fetch_add(1, Ordering::SeqCst);
                let now = probe.running.fetch_add(1, Ordering::SeqCst) + 1;
                probe.peak.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(delay).await;

                probe.running.fetch_sub(1, Ordering::SeqCst);
                probe.completed.fetch_add(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        }))
    }
}

/// Settings with one `main` memory connection and a `default` queue.
pub fn memory_settings(concurrency: u32) -> QueueSettings {
    QueueSettings::default().with_connection(
        ConnectionSettings::new("main")
            .with_queue("default", WorkerOptions::with_concurrency(concurrency)),
    )
}

/// Lock provider whose locks can never be extended.
#[derive(Clone, Default)]
pub struct FailingExtendProvider {
    inner: MemoryLockProvider,
}

impl FailingExtendProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.inner.is_locked(key)
    }
}

struct FailingExtendLock {
    inner: Arc<dyn Lock>,
}

impl Lock for FailingExtendLock {
    fn key(&self) -> &str {
        self.inner.key()
    }

    fn ttl(&self) -> Option<Duration> {
        self.inner.ttl()
    }

    fn acquire_immediately(&self) -> LockFuture<'_, bool> {
        self.inner.acquire_immediately()
    }

    fn extend(&self, _ttl: Option<Duration>) -> LockFuture<'_, ()> {
        let key = self.inner.key().to_string();
        Box::pin(async move { Err(LockError::Storage(format!("cannot extend {key}"))) })
    }

    fn force_release(&self) -> LockFuture<'_, ()> {
        self.inner.force_release()
    }

    fn serialize(&self) -> SerializedLock {
        self.inner.serialize()
    }

    fn remaining_time(&self) -> Option<Duration> {
        self.inner.remaining_time()
    }
}

impl LockProvider for FailingExtendProvider {
    fn create_lock(&self, key: &str, ttl: Option<Duration>) -> Arc<dyn Lock> {
        Arc::new(FailingExtendLock {
            inner: self.inner.create_lock(key, ttl),
        })
    }

    fn restore_lock(&self, serialized: &SerializedLock) -> Result<Arc<dyn Lock>, LockError> {
        Ok(Arc::new(FailingExtendLock {
            inner: self.inner.restore_lock(serialized)?,
        }))
    }
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
