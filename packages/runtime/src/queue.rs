//! Queue orchestrator.
//!
//! Owns one driver per configured connection, provisions their lock
//! providers, routes dispatched jobs and tracks the schedules registered
//! through it so they are cleared on stop.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use queue_core::{
    ConnectionSettings, DriverKind, Job, JobId, LockProvider, QueueError, QueueEvent,
    QueueSettings, SerializedLock, StopOptions,
};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

use crate::driver::{DriverFactory, DriverSettings, QueueDriver};
use crate::handler::JobHandler;
use crate::memory::memory;
use crate::schedule::{
    LockProviderResolver, PendingSchedule, ScheduleError, ScheduleRegistry, TaskCallback,
    TaskFuture,
};

const EVENT_CHANNEL_SIZE: usize = 1024;

/// Live orchestrator configuration.
#[derive(Clone)]
pub struct QueueConfig {
    pub settings: QueueSettings,
    /// Job handlers registered with every connection.
    pub jobs: Vec<Arc<dyn JobHandler>>,
    /// Driver factories by connection name. Connections without one use
    /// the factory matching their configured driver kind.
    pub drivers: HashMap<String, Arc<dyn DriverFactory>>,
    /// Lock provider shared by every connection instead of driver-created ones.
    pub lock_provider: Option<Arc<dyn LockProvider>>,
}

impl QueueConfig {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            jobs: Vec::new(),
            drivers: HashMap::new(),
            lock_provider: None,
        }
    }

    pub fn with_job(self, handler: impl JobHandler) -> Self {
        self.with_handler(Arc::new(handler))
    }

    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.jobs.push(handler);
        self
    }

    pub fn with_driver(
        mut self,
        connection: impl Into<String>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        self.drivers.insert(connection.into(), factory);
        self
    }

    pub fn with_lock_provider(mut self, provider: Arc<dyn LockProvider>) -> Self {
        self.lock_provider = Some(provider);
        self
    }

    /// Check the configuration before any driver is created.
    pub fn validate(&self) -> Result<(), QueueError> {
        self.settings.validate()?;

        for connection in self.drivers.keys() {
            if self.settings.get(connection).is_none() {
                return Err(QueueError::Config(format!(
                    "driver given for unknown connection '{connection}'"
                )));
            }
        }

        for (index, job) in self.jobs.iter().enumerate() {
            if self.jobs[..index]
                .iter()
                .any(|other| other.job_type() == job.job_type())
            {
                return Err(QueueError::Config(format!(
                    "job '{}' is registered twice",
                    job.job_type()
                )));
            }
        }
        Ok(())
    }

    fn factory_for(&self, connection: &ConnectionSettings) -> Arc<dyn DriverFactory> {
        if let Some(factory) = self.drivers.get(&connection.name) {
            return factory.clone();
        }
        match connection.driver {
            DriverKind::Memory => memory(),
        }
    }
}

struct ConnectionDriver {
    name: String,
    driver: Arc<dyn QueueDriver>,
}

struct ProvisionedLock {
    provider: Arc<dyn LockProvider>,
    auto_created: bool,
}

struct QueueInner {
    jobs: Vec<Arc<dyn JobHandler>>,
    drivers: Vec<ConnectionDriver>,
    default_connection: Option<String>,
    explicit_lock_provider: Option<Arc<dyn LockProvider>>,
    registry: Arc<ScheduleRegistry>,
    /// Held across start and stop so they never interleave.
    started: Mutex<bool>,
    providers: RwLock<HashMap<String, ProvisionedLock>>,
    scheduled: RwLock<Vec<String>>,
    events: broadcast::Sender<QueueEvent>,
    forwarders: RwLock<Vec<JoinHandle<()>>>,
}

/// Routes jobs across named connections and manages their lifecycle.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    /// Build the drivers for every configured connection.
    pub fn new(config: QueueConfig, registry: Arc<ScheduleRegistry>) -> Result<Self, QueueError> {
        config.validate()?;

        let mut drivers = Vec::with_capacity(config.settings.connections.len());
        for connection in &config.settings.connections {
            let factory = config.factory_for(connection);
            let driver = factory.create(DriverSettings {
                connection: connection.name.clone(),
                queues: connection.queues.clone(),
                worker: config.settings.worker,
            })?;
            tracing::trace!(
                connection = %connection.name,
                driver = factory.name(),
                "Created queue driver"
            );
            drivers.push(ConnectionDriver {
                name: connection.name.clone(),
                driver,
            });
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Ok(Self {
            inner: Arc::new(QueueInner {
                jobs: config.jobs,
                drivers,
                default_connection: config.settings.connection,
                explicit_lock_provider: config.lock_provider,
                registry,
                started: Mutex::new(false),
                providers: RwLock::new(HashMap::new()),
                scheduled: RwLock::new(Vec::new()),
                events,
                forwarders: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Provision lock providers, register jobs and start every driver.
    ///
    /// If any step fails, the drivers already started are stopped
    /// immediately and provisioned providers are released, leaving the
    /// queue stopped so `start` can be retried.
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut started = self.inner.started.lock().await;
        if *started {
            tracing::warn!("Queue is already started");
            return Ok(());
        }

        let mut running = 0;
        if let Err(e) = self.bring_up(&mut running).await {
            tracing::error!(error = %e, "Failed to start queue, rolling back");
            self.tear_down(&self.inner.drivers[..running], StopOptions::immediate())
                .await;
            return Err(e);
        }

        *started = true;
        tracing::info!(connections = self.inner.drivers.len(), "Queue started");
        Ok(())
    }

    /// Clear this queue's schedules, stop every driver and release lock providers.
    ///
    /// Every driver is stopped even if one fails; the first error is returned.
    pub async fn stop(&self, options: StopOptions) -> Result<(), QueueError> {
        let mut started = self.inner.started.lock().await;
        if !*started {
            tracing::warn!("Queue is not started");
            return Ok(());
        }

        let scheduled = std::mem::take(
            &mut *self
                .inner
                .scheduled
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for name in scheduled {
            if let Err(e) = self.inner.registry.clear(Some(&name)).await {
                tracing::warn!(task = %name, error = %e, "Failed to clear scheduled task");
            }
        }

        let first_error = self.tear_down(&self.inner.drivers, options).await;

        *started = false;
        tracing::info!("Queue stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Dispatch a job to its connection, or the default one.
    pub async fn enqueue(&self, mut job: Job) -> Result<JobId, QueueError> {
        let driver = self.driver(job.connection.as_deref())?;
        if job.queue.is_none() {
            job.queue = Some(driver.default_queue()?);
        }
        let job = driver.enqueue(job).await?;
        Ok(job.id)
    }

    /// Schedule `job` to be dispatched on a cron pattern.
    ///
    /// Each tick enqueues a fresh copy of the job carrying the task's lock,
    /// which the worker keeps alive and releases when the job finishes. The
    /// task is named after the job type unless renamed with `.named()`.
    pub fn schedule(&self, job: Job) -> PendingSchedule {
        let name = job.name.clone();
        let connection = job.connection.clone();

        let weak = Arc::downgrade(&self.inner);
        let callback: TaskCallback = Arc::new(move |lock: Option<SerializedLock>| -> TaskFuture {
            let weak = weak.clone();
            let template = job.clone();
            Box::pin(async move {
                let queue = upgrade(&weak)?;
                let mut job = template.respawn();
                if let Some(lock) = &lock {
                    job.attach_lock(lock)?;
                }
                queue.enqueue(job).await?;
                Ok(())
            })
        });

        let weak = Arc::downgrade(&self.inner);
        let resolver: LockProviderResolver =
            Arc::new(move || -> Result<Arc<dyn LockProvider>, ScheduleError> {
                let queue = upgrade(&weak)?;
                Ok(queue.lock_provider(connection.as_deref())?)
            });

        let weak = Arc::downgrade(&self.inner);
        PendingSchedule::new(name, callback, resolver, self.inner.registry.clone())
            .hand_off()
            .on_submit(move |name| {
                if let Ok(queue) = upgrade(&weak) {
                    queue.track_schedule(name);
                }
            })
    }

    /// Lock provider in use by a connection, or the default connection.
    pub fn lock_provider(&self, connection: Option<&str>) -> Result<Arc<dyn LockProvider>, QueueError> {
        self.driver(connection)?
            .core()
            .lock_provider()
            .ok_or(QueueError::NotStarted)
    }

    /// Driver for `connection`; without one, the configured default or the first.
    pub fn driver(&self, connection: Option<&str>) -> Result<Arc<dyn QueueDriver>, QueueError> {
        let resolved = match connection {
            Some(name) => self.connection(name),
            None => match &self.inner.default_connection {
                Some(name) => self.connection(name),
                None => self.inner.drivers.first(),
            },
        };
        match (resolved, connection) {
            (Some(connection), _) => Ok(connection.driver.clone()),
            (None, Some(name)) => Err(QueueError::ConnectionNotFound(name.to_string())),
            (None, None) => Err(QueueError::NoDrivers),
        }
    }

    pub fn connections(&self) -> Vec<String> {
        self.inner.drivers.iter().map(|c| c.name.clone()).collect()
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.inner.registry
    }

    /// Names of tasks scheduled through this queue and not yet cleared.
    pub fn scheduled_tasks(&self) -> Vec<String> {
        self.inner
            .scheduled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn is_started(&self) -> bool {
        *self.inner.started.lock().await
    }

    /// Events from every driver.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    fn connection(&self, name: &str) -> Option<&ConnectionDriver> {
        self.inner.drivers.iter().find(|c| c.name == name)
    }

    fn track_schedule(&self, name: &str) {
        let mut scheduled = self
            .inner
            .scheduled
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !scheduled.iter().any(|n| n == name) {
            scheduled.push(name.to_string());
        }
    }

    /// Counts started drivers in `running` so a failure can stop exactly those.
    async fn bring_up(&self, running: &mut usize) -> Result<(), QueueError> {
        for connection in &self.inner.drivers {
            let provisioned = match &self.inner.explicit_lock_provider {
                Some(provider) => ProvisionedLock {
                    provider: provider.clone(),
                    auto_created: false,
                },
                None => ProvisionedLock {
                    provider: connection.driver.create_lock_provider()?,
                    auto_created: true,
                },
            };
            connection
                .driver
                .set_lock_provider(provisioned.provider.clone());
            self.inner
                .providers
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(connection.name.clone(), provisioned);
        }

        for job in &self.inner.jobs {
            for connection in &self.inner.drivers {
                connection.driver.register(job.clone());
            }
        }

        self.forward_events();

        for connection in &self.inner.drivers {
            connection.driver.start().await?;
            *running += 1;
        }
        Ok(())
    }

    /// Stop `drivers`, then unregister jobs, release every provisioned
    /// provider and abort the event forwarders. Returns the first stop error.
    async fn tear_down(
        &self,
        drivers: &[ConnectionDriver],
        options: StopOptions,
    ) -> Option<QueueError> {
        let mut first_error = None;
        for connection in drivers {
            if let Err(e) = connection.driver.stop(options).await {
                tracing::error!(connection = %connection.name, error = %e, "Failed to stop queue driver");
                first_error.get_or_insert(e);
            }
        }

        for job in &self.inner.jobs {
            for connection in &self.inner.drivers {
                connection.driver.unregister(job.job_type());
            }
        }

        let providers: Vec<(String, ProvisionedLock)> = self
            .inner
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (name, provisioned) in providers {
            let Some(connection) = self.connection(&name) else {
                continue;
            };
            connection.driver.core().take_lock_provider();
            if provisioned.auto_created
                && let Err(e) = connection
                    .driver
                    .destroy_lock_provider(provisioned.provider)
                    .await
            {
                tracing::warn!(connection = %name, error = %e, "Failed to destroy lock provider");
            }
        }

        for forwarder in self
            .inner
            .forwarders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            forwarder.abort();
        }
        first_error
    }

    fn forward_events(&self) {
        let mut forwarders = self
            .inner
            .forwarders
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for connection in &self.inner.drivers {
            let mut rx = connection.driver.subscribe();
            let tx = self.inner.events.clone();
            let name = connection.name.clone();
            forwarders.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let _ = tx.send(event);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(connection = %name, skipped, "Event forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
    }
}

fn upgrade(weak: &Weak<QueueInner>) -> Result<Queue, ScheduleError> {
    weak.upgrade()
        .map(|inner| Queue { inner })
        .ok_or(ScheduleError::QueueDropped)
}
