//! The queue driver contract.
//!
//! Every backend implements [`QueueDriver`] and composes a [`DriverCore`],
//! which owns the state and checks shared by all backends: registered
//! queues and job types, the connection's lock provider, the event
//! channel, and the processing path for dequeued jobs.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{
    Job, JobError, JobId, Lock, LockProvider, QualifiedName, QueueError, QueueEvent,
    QueueSettingsEntry, SerializedLock, StopOptions, WorkerOptions, parse_name,
    validate_queue_name,
};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::handler::{JobContext, JobHandler, JobHandlerRegistry};
use crate::heartbeat::Heartbeat;

/// Future returned by driver operations.
pub type DriverFuture<'a, T> = BoxFuture<'a, Result<T, QueueError>>;

const EVENT_CHANNEL_SIZE: usize = 1024;

/// What a driver needs to know about its connection.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub connection: String,
    /// Configured queues and their default worker options, in order.
    pub queues: Vec<QueueSettingsEntry>,
    /// Whether this process runs workers.
    pub worker: bool,
}

/// A unit of work pulled from a backing store.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: JobId,
    pub fully_qualified_name: String,
    pub payload: Value,
}

impl Delivery {
    pub fn from_job(job: Job, fully_qualified_name: String) -> Self {
        Self {
            id: job.id,
            fully_qualified_name,
            payload: job.payload,
        }
    }
}

/// Builds a driver for one connection.
pub trait DriverFactory: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    fn create(&self, settings: DriverSettings) -> Result<Arc<dyn QueueDriver>, QueueError>;
}

/// Lifecycle contract every backend implements.
pub trait QueueDriver: Send + Sync {
    /// Shared state composed into the driver.
    fn core(&self) -> &DriverCore;

    /// Start listening on `queue`. Fails if the queue is already registered.
    fn listen(&self, queue: String, options: Option<WorkerOptions>) -> DriverFuture<'_, ()>;

    /// Begin accepting work.
    fn start(&self) -> DriverFuture<'_, ()> {
        self.listen_configured()
    }

    /// Stop accepting work and clear registered state.
    fn stop(&self, _options: StopOptions) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            self.core().clear();
            Ok(())
        })
    }

    /// Send a job to the backend. Returns the job with its queue resolved.
    fn enqueue(&self, job: Job) -> DriverFuture<'_, Job>;

    /// Create a lock provider bound to this backend's storage.
    fn create_lock_provider(&self) -> Result<Arc<dyn LockProvider>, QueueError>;

    /// Release resources behind a provider created by [`QueueDriver::create_lock_provider`].
    fn destroy_lock_provider(&self, provider: Arc<dyn LockProvider>) -> DriverFuture<'_, ()> {
        drop(provider);
        Box::pin(async { Ok(()) })
    }

    /// Listen on every configured queue.
    fn listen_configured(&self) -> DriverFuture<'_, ()> {
        Box::pin(async move {
            for entry in self.core().configured_queues() {
                self.listen(entry.name.clone(), Some(entry.options)).await?;
            }
            Ok(())
        })
    }

    fn connection(&self) -> &str {
        self.core().connection()
    }

    fn register(&self, handler: Arc<dyn JobHandler>) {
        self.core().register(handler);
    }

    fn unregister(&self, job_type: &str) {
        self.core().unregister(job_type);
    }

    fn set_lock_provider(&self, provider: Arc<dyn LockProvider>) {
        self.core().set_lock_provider(provider);
    }

    fn default_queue(&self) -> Result<String, QueueError> {
        self.core().default_queue()
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.core().subscribe()
    }
}

/// State and checks shared by every driver.
pub struct DriverCore {
    connection: String,
    queue_options: Vec<QueueSettingsEntry>,
    worker: bool,
    registered_queues: RwLock<Vec<String>>,
    registered_jobs: RwLock<JobHandlerRegistry>,
    lock_provider: RwLock<Option<Arc<dyn LockProvider>>>,
    events: broadcast::Sender<QueueEvent>,
}

impl DriverCore {
    pub fn new(settings: DriverSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            connection: settings.connection,
            queue_options: settings.queues,
            worker: settings.worker,
            registered_queues: RwLock::new(Vec::new()),
            registered_jobs: RwLock::new(JobHandlerRegistry::new()),
            lock_provider: RwLock::new(None),
            events,
        }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn worker_enabled(&self) -> bool {
        self.worker
    }

    pub fn configured_queues(&self) -> &[QueueSettingsEntry] {
        &self.queue_options
    }

    /// Configured defaults for `queue` overlaid with call-site options.
    pub fn merged_options(&self, queue: &str, options: Option<WorkerOptions>) -> WorkerOptions {
        self.queue_options
            .iter()
            .find(|entry| entry.name == queue)
            .map(|entry| entry.options)
            .unwrap_or_default()
            .merge(options)
    }

    /// Register `queue` and return its merged worker options.
    pub fn listen(
        &self,
        queue: &str,
        options: Option<WorkerOptions>,
    ) -> Result<WorkerOptions, QueueError> {
        validate_queue_name(queue)?;
        {
            let mut queues = self
                .registered_queues
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if queues.iter().any(|q| q == queue) {
                return Err(QueueError::QueueAlreadyRegistered(queue.to_string()));
            }
            queues.push(queue.to_string());
        }

        let merged = self.merged_options(queue, options);
        tracing::trace!(
            connection = %self.connection,
            queue,
            concurrency = merged.concurrency(),
            "Listening queue"
        );
        Ok(merged)
    }

    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type().to_string();
        let added = self
            .registered_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(handler);
        if added {
            tracing::trace!(connection = %self.connection, job = %job_type, "Registered job");
        }
    }

    pub fn unregister(&self, job_type: &str) {
        let removed = self
            .registered_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(job_type);
        if removed {
            tracing::trace!(connection = %self.connection, job = job_type, "Unregistered job");
        }
    }

    /// Registered handlers, for drivers that create per-type workers.
    pub fn handlers(&self) -> Vec<Arc<dyn JobHandler>> {
        let registry = self
            .registered_jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        registry
            .job_types()
            .into_iter()
            .filter_map(|job_type| registry.get(job_type))
            .collect()
    }

    pub fn registered_queues(&self) -> Vec<String> {
        self.registered_queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget every registered queue and job type.
    pub fn clear(&self) {
        self.registered_queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.registered_jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn check_queue_registered(&self, queue: &str) -> Result<(), QueueError> {
        let queues = self
            .registered_queues
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !queues.iter().any(|q| q == queue) {
            return Err(QueueError::QueueNotRegistered(queue.to_string()));
        }
        Ok(())
    }

    pub fn check_job_registered(&self, job_type: &str) -> Result<(), QueueError> {
        let registered = self
            .registered_jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_handler(job_type);
        if !registered {
            return Err(QueueError::JobNotRegistered(job_type.to_string()));
        }
        Ok(())
    }

    /// The first registered queue.
    pub fn default_queue(&self) -> Result<String, QueueError> {
        self.registered_queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
            .ok_or_else(|| QueueError::NoQueues(self.connection.clone()))
    }

    /// Checks every enqueue runs before any backend-specific send.
    ///
    /// Resolves the job's queue and connection and returns its fully-qualified name.
    pub fn prepare_enqueue(&self, job: &mut Job) -> Result<String, QueueError> {
        if job.queue.is_none() {
            job.queue = Some(self.default_queue()?);
        }
        job.connection = Some(self.connection.clone());

        let fully_qualified_name = job.fully_qualified_name()?;
        if let Some(queue) = job.queue.as_deref() {
            self.check_queue_registered(queue)?;
        }
        self.check_job_registered(&job.name)?;
        Ok(fully_qualified_name)
    }

    pub fn set_lock_provider(&self, provider: Arc<dyn LockProvider>) {
        *self
            .lock_provider
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(provider);
    }

    pub fn lock_provider(&self) -> Option<Arc<dyn LockProvider>> {
        self.lock_provider
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn take_lock_provider(&self) -> Option<Arc<dyn LockProvider>> {
        self.lock_provider
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    /// Run a dequeued job through its handler.
    ///
    /// A lock handed off by the scheduler is restored, re-acquired and kept
    /// alive by a heartbeat for the duration of the handler, then released
    /// whatever the outcome. Handler failures are reported on the event
    /// channel and returned to the backend for fail/ack bookkeeping.
    pub async fn process(&self, delivery: Delivery) -> Result<(), QueueError> {
        let Some(QualifiedName { queue, name }) = parse_name(&delivery.fully_qualified_name)
        else {
            let error = QueueError::InvalidJobName(delivery.fully_qualified_name);
            tracing::warn!(connection = %self.connection, "{}", error);
            return Err(error);
        };

        let handler = self
            .registered_jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name);
        let Some(handler) = handler else {
            let error = QueueError::JobNotRegistered(name);
            tracing::warn!(connection = %self.connection, "{}", error);
            return Err(error);
        };

        let mut job = Job {
            id: delivery.id,
            name,
            connection: Some(self.connection.clone()),
            queue: Some(queue.clone()),
            payload: delivery.payload,
            created_at: Utc::now(),
        };

        tracing::debug!(
            connection = %self.connection,
            queue = %queue,
            job = %job.name,
            id = %job.id,
            "Processing job"
        );

        let serialized = job.take_lock().unwrap_or_else(|e| {
            tracing::warn!(job = %job.name, id = %job.id, error = %e, "Ignoring malformed lock");
            None
        });
        let lock = match serialized {
            Some(serialized) => self.restore_lock(&job, &serialized).await,
            None => None,
        };
        let heartbeat = lock
            .as_ref()
            .and_then(|lock| Heartbeat::start(lock.clone(), job.id, self.events.clone()));

        let ctx = JobContext {
            id: job.id,
            name: job.name.clone(),
            queue,
            connection: self.connection.clone(),
        };

        self.emit(QueueEvent::JobStarted {
            job: job.clone(),
            timestamp: Utc::now(),
        });
        let started = Instant::now();

        let result = std::panic::AssertUnwindSafe(handler.handle(ctx, job.payload.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(JobError::from("job handler panicked")));

        if let Some(heartbeat) = heartbeat {
            heartbeat.stop().await;
        }
        if let Some(lock) = lock {
            self.release_lock(&job, lock.as_ref()).await;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                tracing::trace!(
                    connection = %self.connection,
                    job = %job.name,
                    id = %job.id,
                    elapsed_ms,
                    "Job completed"
                );
                self.emit(QueueEvent::JobCompleted {
                    job: job.clone(),
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(
                    connection = %self.connection,
                    job = %job.name,
                    id = %job.id,
                    error = %e,
                    "Job execution failed"
                );
                self.emit(QueueEvent::JobFailed {
                    job: job.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }
        self.emit(QueueEvent::JobFinished {
            job,
            elapsed_ms,
            timestamp: Utc::now(),
        });

        result.map_err(QueueError::from)
    }

    async fn restore_lock(&self, job: &Job, serialized: &SerializedLock) -> Option<Arc<dyn Lock>> {
        let Some(provider) = self.lock_provider() else {
            tracing::warn!(
                job = %job.name,
                id = %job.id,
                "Job carries a lock but the connection has no lock provider"
            );
            return None;
        };

        let lock = match provider.restore_lock(serialized) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(job = %job.name, id = %job.id, error = %e, "Failed to restore lock");
                return None;
            }
        };

        match lock.acquire_immediately().await {
            Ok(true) => {
                tracing::trace!(
                    job = %job.name,
                    id = %job.id,
                    key = %serialized.key,
                    "Restored lock from scheduler"
                );
                Some(lock)
            }
            Ok(false) => {
                tracing::warn!(
                    job = %job.name,
                    id = %job.id,
                    key = %serialized.key,
                    "Handed-off lock is held by another owner, running without it"
                );
                None
            }
            Err(e) => {
                tracing::warn!(job = %job.name, id = %job.id, error = %e, "Failed to restore lock");
                None
            }
        }
    }

    async fn release_lock(&self, job: &Job, lock: &dyn Lock) {
        match lock.force_release().await {
            Ok(()) => tracing::trace!(
                job = %job.name,
                id = %job.id,
                key = lock.key(),
                "Released lock for scheduled job"
            ),
            Err(e) => tracing::warn!(
                job = %job.name,
                id = %job.id,
                error = %e,
                "Failed to release lock"
            ),
        }
    }
}
