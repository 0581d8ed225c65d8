//! Named registry of active cron triggers.

use std::collections::HashMap;

use tokio::sync::{Mutex, OnceCell};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use uuid::Uuid;

use super::{ScheduleError, ScheduledTask};

/// Handle of a task registered with the cron scheduler.
#[derive(Debug, Clone)]
struct CronTrigger {
    id: Uuid,
    pattern: String,
}

/// Map from task name to its cron trigger.
///
/// Create one per application (or per test) and share it with every
/// [`crate::Queue`] and [`crate::Scheduler`] that should see the same names.
#[derive(Default)]
pub struct ScheduleRegistry {
    scheduler: OnceCell<JobScheduler>,
    triggers: Mutex<HashMap<String, CronTrigger>>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn scheduler(&self) -> Result<&JobScheduler, ScheduleError> {
        self.scheduler
            .get_or_try_init(|| async {
                let scheduler = JobScheduler::new().await?;
                scheduler.start().await?;
                tracing::trace!("Cron scheduler started");
                Ok::<_, ScheduleError>(scheduler)
            })
            .await
    }

    /// Start firing `task` on its cron pattern. Fails if the name is taken.
    pub async fn add(&self, task: ScheduledTask) -> Result<(), ScheduleError> {
        let mut triggers = self.triggers.lock().await;
        if triggers.contains_key(task.name()) {
            return Err(ScheduleError::Duplicate(task.name().to_string()));
        }

        let name = task.name().to_string();
        let pattern = task.cron_pattern().to_string();
        let cron_job = CronJob::new_async(pattern.as_str(), move |_id, _scheduler| {
            let task = task.clone();
            Box::pin(async move {
                // Ticks run detached so a long task never delays the next fire.
                tokio::spawn(async move {
                    if let Err(e) = task.tick().await {
                        tracing::error!(task = %task.name(), error = %e, "Scheduled task failed");
                    }
                });
            })
        })?;

        let id = self.scheduler().await?.add(cron_job).await?;
        tracing::debug!(task = %name, cron = %pattern, "Scheduled task");
        triggers.insert(name, CronTrigger { id, pattern });
        Ok(())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.triggers.lock().await.contains_key(name)
    }

    /// Cron pattern of a registered task.
    pub async fn pattern(&self, name: &str) -> Option<String> {
        self.triggers
            .lock()
            .await
            .get(name)
            .map(|trigger| trigger.pattern.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.triggers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop and remove one task, or every task when `name` is `None`.
    pub async fn clear(&self, name: Option<&str>) -> Result<(), ScheduleError> {
        let mut triggers = self.triggers.lock().await;
        let removed: Vec<(String, CronTrigger)> = match name {
            Some(name) => triggers.remove_entry(name).into_iter().collect(),
            None => triggers.drain().collect(),
        };
        if removed.is_empty() {
            return Ok(());
        }

        let scheduler = self.scheduler().await?;
        for (name, trigger) in removed {
            scheduler.remove(&trigger.id).await?;
            tracing::debug!(task = %name, "Cleared scheduled task");
        }
        Ok(())
    }

    /// Clear every task and stop the cron scheduler.
    pub async fn shutdown(&self) -> Result<(), ScheduleError> {
        self.clear(None).await?;
        if let Some(scheduler) = self.scheduler.get() {
            let mut scheduler = scheduler.clone();
            scheduler.shutdown().await?;
        }
        Ok(())
    }
}
