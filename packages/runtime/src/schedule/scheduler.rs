//! Standalone scheduler for plain callbacks.

use std::future::Future;
use std::sync::Arc;

use queue_core::{JobError, LockProvider, MemoryLockProvider, SerializedLock};

use super::{
    LockProviderResolver, PendingSchedule, ScheduleError, ScheduleRegistry, ScheduledTask,
    TaskCallback, TaskFuture,
};

/// Schedules callbacks that are not queue jobs.
///
/// Locks come from an in-memory provider unless another one is supplied,
/// which limits overlap protection to this process.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<ScheduleRegistry>,
    lock_provider: Arc<dyn LockProvider>,
}

impl Scheduler {
    pub fn new(registry: Arc<ScheduleRegistry>) -> Self {
        Self {
            registry,
            lock_provider: Arc::new(MemoryLockProvider::new()),
        }
    }

    /// Use a shared lock provider so several processes coordinate.
    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.lock_provider = provider;
        self
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.registry
    }

    pub fn lock_provider(&self) -> Arc<dyn LockProvider> {
        self.lock_provider.clone()
    }

    /// Start configuring a recurring call of `f` under `name`.
    pub fn call<F, Fut>(&self, name: impl Into<String>, f: F) -> PendingSchedule
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let callback: TaskCallback =
            Arc::new(move |_lock: Option<SerializedLock>| -> TaskFuture {
                let fut = f();
                Box::pin(async move { fut.await.map_err(ScheduleError::from) })
            });

        let provider = self.lock_provider.clone();
        let resolver: LockProviderResolver =
            Arc::new(move || -> Result<Arc<dyn LockProvider>, ScheduleError> {
                Ok(provider.clone())
            });

        PendingSchedule::new(name, callback, resolver, self.registry.clone())
    }

    /// Register an already built task.
    pub async fn submit(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        self.registry.add(task).await
    }

    /// Stop and remove one task, or all of them.
    pub async fn clear(&self, name: Option<&str>) -> Result<(), ScheduleError> {
        self.registry.clear(name).await
    }
}
