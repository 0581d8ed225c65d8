//! In-process queue driver.
//!
//! Jobs live only in memory: one [`PoolActor`] per `(queue, job type)` pair
//! holds pending deliveries and runs up to `concurrency` of them at once.
//! Locks come from a [`MemoryLockProvider`], so coordination only spans
//! the current process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use queue_core::{
    Job, LockProvider, MemoryLockProvider, QueueError, StopOptions, WorkerOptions, compile_name,
};
use ractor::{Actor, ActorRef};

use crate::driver::{Delivery, DriverCore, DriverFactory, DriverFuture, DriverSettings, QueueDriver};
use crate::messages::{PoolMessage, PoolStats};
use crate::pool_actor::{InFlight, PoolActor, PoolArguments};

#[derive(Debug, Default, Clone, Copy)]
struct DriverState {
    is_started: bool,
    is_pausing: bool,
}

/// Queue driver backed by in-process worker pools.
pub struct MemoryQueueDriver {
    core: Arc<DriverCore>,
    state: RwLock<DriverState>,
    pools: RwLock<HashMap<String, ActorRef<PoolMessage>>>,
    running: Arc<InFlight>,
}

impl MemoryQueueDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            core: Arc::new(DriverCore::new(settings)),
            state: RwLock::new(DriverState::default()),
            pools: RwLock::new(HashMap::new()),
            running: Arc::new(InFlight::new()),
        }
    }

    /// Jobs currently executing across every pool.
    pub fn running_jobs(&self) -> usize {
        self.running.count()
    }

    /// Stats of the pool serving `fully_qualified_name`, if one exists.
    pub async fn pool_stats(&self, fully_qualified_name: &str) -> Option<PoolStats> {
        let pool = self.pool(fully_qualified_name)?;
        match ractor::rpc::call(&pool, |reply| PoolMessage::GetStats { reply }, None).await {
            Ok(ractor::rpc::CallResult::Success(stats)) => Some(stats),
            _ => None,
        }
    }

    fn state(&self) -> DriverState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: DriverState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn pool(&self, fully_qualified_name: &str) -> Option<ActorRef<PoolMessage>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fully_qualified_name)
            .cloned()
    }

    fn all_pools(&self) -> Vec<ActorRef<PoolMessage>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn create_worker(
        &self,
        fully_qualified_name: String,
        concurrency: u32,
    ) -> Result<(), QueueError> {
        if self.pool(&fully_qualified_name).is_some() {
            return Ok(());
        }

        if concurrency == 0 {
            tracing::trace!(
                connection = self.core.connection(),
                pool = %fully_qualified_name,
                "Queue worker is disabled, jobs will accumulate"
            );
        }

        let (pool, _handle) = Actor::spawn(
            None,
            PoolActor,
            PoolArguments {
                fully_qualified_name: fully_qualified_name.clone(),
                concurrency,
                core: self.core.clone(),
                running: self.running.clone(),
            },
        )
        .await
        .map_err(|e| QueueError::Actor(format!("Failed to spawn worker: {}", e)))?;

        if self.state().is_started {
            let _ = pool.send_message(PoolMessage::Resume);
        }

        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fully_qualified_name, pool);
        Ok(())
    }

    async fn wait_for_idle(&self) {
        self.running.wait_idle().await;
    }
}

impl QueueDriver for MemoryQueueDriver {
    fn core(&self) -> &DriverCore {
        &self.core
    }

    fn listen(&self, queue: String, options: Option<WorkerOptions>) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            let merged = self.core.listen(&queue, options)?;
            let concurrency = if self.core.worker_enabled() {
                merged.concurrency()
            } else {
                0
            };

            for handler in self.core.handlers() {
                let fully_qualified_name = compile_name(&queue, handler.job_type());
                self.create_worker(fully_qualified_name, concurrency).await?;
            }
            Ok(())
        })
    }

    fn start(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.listen_configured().await?;

            self.set_state(DriverState {
                is_started: true,
                is_pausing: false,
            });
            for pool in self.all_pools() {
                let _ = pool.send_message(PoolMessage::Resume);
            }

            tracing::trace!(
                connection = self.core.connection(),
                driver = "memory",
                "Queue driver started"
            );
            Ok(())
        })
    }

    fn stop(&self, options: StopOptions) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            tracing::trace!(
                connection = self.core.connection(),
                driver = "memory",
                graceful = options.graceful,
                timeout_ms = options.timeout.as_millis() as u64,
                "Waiting for workers to stop"
            );

            let pools = self.all_pools();
            let mut result = Ok(());

            if options.graceful {
                self.set_state(DriverState {
                    is_pausing: true,
                    ..self.state()
                });
                for pool in &pools {
                    let _ = pool.send_message(PoolMessage::Pause);
                }

                if tokio::time::timeout(options.timeout, self.wait_for_idle())
                    .await
                    .is_err()
                {
                    tracing::warn!(
                        connection = self.core.connection(),
                        running = self.running_jobs(),
                        "Graceful shutdown timeout reached, abandoning running jobs"
                    );
                    result = Err(QueueError::ShutdownTimeout(options.timeout));
                }
            }

            // Killing a pool abandons its in-flight tasks without interrupting them.
            for pool in pools {
                let _ = pool.send_message(PoolMessage::Pause);
                pool.kill();
            }
            self.pools
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            self.set_state(DriverState::default());
            self.core.clear();

            tracing::trace!(
                connection = self.core.connection(),
                driver = "memory",
                "Queue driver stopped"
            );
            result
        })
    }

    fn enqueue(&self, mut job: Job) -> DriverFuture<'_, Job> {
        Box::pin(async move {
            let state = self.state();
            if !state.is_started {
                return Err(QueueError::NotStarted);
            }
            if state.is_pausing {
                return Err(QueueError::ShuttingDown);
            }

            let fully_qualified_name = self.core.prepare_enqueue(&mut job)?;

            tracing::trace!(
                connection = self.core.connection(),
                queue = job.queue.as_deref(),
                job = %job.name,
                id = %job.id,
                "Enqueuing job"
            );

            let pool = self
                .pool(&fully_qualified_name)
                .ok_or_else(|| QueueError::NoWorker(fully_qualified_name.clone()))?;

            let delivery = Delivery::from_job(job.clone(), fully_qualified_name);
            pool.send_message(PoolMessage::Push {
                delivery: Box::new(delivery),
            })
            .map_err(|e| QueueError::Actor(format!("Failed to enqueue job: {}", e)))?;

            Ok(job)
        })
    }

    fn create_lock_provider(&self) -> Result<Arc<dyn LockProvider>, QueueError> {
        Ok(Arc::new(MemoryLockProvider::new()))
    }
}

/// Factory for [`MemoryQueueDriver`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryDriverFactory;

impl DriverFactory for MemoryDriverFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self, settings: DriverSettings) -> Result<Arc<dyn QueueDriver>, QueueError> {
        Ok(Arc::new(MemoryQueueDriver::new(settings)))
    }
}

/// In-memory driver with no persistence. Locks only span this process.
pub fn memory() -> Arc<dyn DriverFactory> {
    Arc::new(MemoryDriverFactory)
}
