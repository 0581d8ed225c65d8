//! Schedule builder and the per-tick lock protocol.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use queue_core::{Lock, LockProvider, SerializedLock, lock_key};

use super::interval::{DayOfWeek, IntervalCronOptions, ScheduleInterval, parse_time};
use super::{ScheduleError, ScheduleRegistry};

/// Default time other instances are kept from running the same task.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);

/// Future returned by a scheduled callback.
pub type TaskFuture = BoxFuture<'static, Result<(), ScheduleError>>;

/// Callback run on each tick. Receives the serialized lock when handing off.
pub type TaskCallback = Arc<dyn Fn(Option<SerializedLock>) -> TaskFuture + Send + Sync>;

/// Resolves the lock provider at tick time.
pub type LockProviderResolver =
    Arc<dyn Fn() -> Result<Arc<dyn LockProvider>, ScheduleError> + Send + Sync>;

type SubmitHook = Box<dyn FnOnce(&str) + Send>;

/// Lock behavior of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// How long the lock is held before it expires on its own.
    pub ttl: Duration,
    /// Run every tick without locking.
    pub overlap: bool,
    /// Pass the held lock to the callback instead of releasing it.
    pub hand_off: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LOCK_TTL,
            overlap: false,
            hand_off: false,
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The callback ran and any lock was released.
    Ran,
    /// Another owner holds the lock.
    Skipped,
    /// The callback took ownership of the lock.
    HandedOff,
}

/// Fluent schedule configuration.
///
/// Nothing is registered until [`PendingSchedule::submit`] runs.
pub struct PendingSchedule {
    name: String,
    callback: TaskCallback,
    resolver: LockProviderResolver,
    registry: Arc<ScheduleRegistry>,
    cron_pattern: Option<String>,
    interval: ScheduleInterval,
    interval_options: IntervalCronOptions,
    lock: LockOptions,
    on_submit: Option<SubmitHook>,
}

impl PendingSchedule {
    pub fn new(
        name: impl Into<String>,
        callback: TaskCallback,
        resolver: LockProviderResolver,
        registry: Arc<ScheduleRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            callback,
            resolver,
            registry,
            cron_pattern: None,
            interval: ScheduleInterval::Day,
            interval_options: IntervalCronOptions::default(),
            lock: LockOptions::default(),
            on_submit: None,
        }
    }

    /// Use a six-field cron pattern, seconds first.
    pub fn cron(mut self, pattern: impl Into<String>) -> Self {
        self.cron_pattern = Some(pattern.into());
        self
    }

    pub fn every(self, interval: ScheduleInterval) -> Self {
        self.every_with(interval, IntervalCronOptions::default())
    }

    /// Run at `interval`, offset by `options` for hourly and larger intervals.
    pub fn every_with(mut self, interval: ScheduleInterval, options: IntervalCronOptions) -> Self {
        self.interval = interval;
        self.interval_options = options;
        self.cron_pattern = Some(interval.to_cron(&options));
        self
    }

    /// Pick the weekday of a weekly or monthly interval.
    pub fn on(mut self, day: DayOfWeek) -> Result<Self, ScheduleError> {
        if !self.interval.accepts_day_of_week() {
            return Err(ScheduleError::DayOfWeekNotAllowed(self.interval));
        }
        self.interval_options.day_of_week = Some(day);
        self.cron_pattern = Some(self.interval.to_cron(&self.interval_options));
        Ok(self)
    }

    /// Pick the `"HH:MM"` time of a daily or larger interval.
    pub fn at(mut self, time: &str) -> Result<Self, ScheduleError> {
        if !self.interval.accepts_time() {
            return Err(ScheduleError::TimeNotAllowed(self.interval));
        }
        let (hour, minute) = parse_time(time)?;
        self.interval_options.hour = hour;
        self.interval_options.minute = minute;
        self.cron_pattern = Some(self.interval.to_cron(&self.interval_options));
        Ok(self)
    }

    /// How long other instances are kept from running this task.
    ///
    /// Should cover the task's run time since the lock is released as soon
    /// as it finishes.
    pub fn lock_for(mut self, ttl: Duration) -> Self {
        self.lock.ttl = ttl;
        self
    }

    /// Allow overlapping executions of the same task.
    pub fn overlapping(mut self) -> Self {
        self.lock.overlap = true;
        self
    }

    /// Override the task name, which is also the lock identity.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn hand_off(mut self) -> Self {
        self.lock.hand_off = true;
        self
    }

    pub(crate) fn on_submit(mut self, hook: impl FnOnce(&str) + Send + 'static) -> Self {
        self.on_submit = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cron_pattern(&self) -> Option<&str> {
        self.cron_pattern.as_deref()
    }

    /// Finish configuration without registering anything.
    pub fn build(&self) -> Result<ScheduledTask, ScheduleError> {
        let cron_pattern = self
            .cron_pattern
            .clone()
            .ok_or(ScheduleError::MissingPattern)?;

        Ok(ScheduledTask {
            name: self.name.clone(),
            cron_pattern,
            lock: self.lock,
            callback: self.callback.clone(),
            resolver: self.resolver.clone(),
        })
    }

    /// Register the task with the cron registry. Returns the task name.
    pub async fn submit(self) -> Result<String, ScheduleError> {
        let task = self.build()?;
        let name = task.name.clone();
        self.registry.add(task).await?;

        if let Some(hook) = self.on_submit {
            hook(&name);
        }
        Ok(name)
    }
}

/// A fully configured recurring task.
#[derive(Clone)]
pub struct ScheduledTask {
    name: String,
    cron_pattern: String,
    lock: LockOptions,
    callback: TaskCallback,
    resolver: LockProviderResolver,
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("cron_pattern", &self.cron_pattern)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cron_pattern(&self) -> &str {
        &self.cron_pattern
    }

    pub fn lock_options(&self) -> LockOptions {
        self.lock
    }

    pub fn lock_key(&self) -> String {
        lock_key(&self.name)
    }

    /// Run one tick of the task.
    ///
    /// Without overlap, the tick only runs if it wins the task's lock. A
    /// plain task releases the lock when its callback returns, failed or
    /// not. A hand-off task keeps it held for the callback's new owner
    /// unless the callback itself fails.
    pub async fn tick(&self) -> Result<TickOutcome, ScheduleError> {
        if self.lock.overlap {
            self.run(None).await?;
            return Ok(TickOutcome::Ran);
        }

        let key = self.lock_key();
        let provider = (self.resolver)()?;
        let lock = provider.create_lock(&key, Some(self.lock.ttl));

        match lock.acquire_immediately().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::trace!(task = %self.name, key = %key, "Lock held elsewhere, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
            Err(e) => {
                tracing::warn!(task = %self.name, key = %key, error = %e, "Failed to acquire lock, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
        }

        if self.lock.hand_off {
            return match self.run(Some(lock.serialize())).await {
                Ok(()) => {
                    tracing::trace!(task = %self.name, key = %key, "Handed off lock");
                    Ok(TickOutcome::HandedOff)
                }
                Err(e) => {
                    release(&self.name, lock.as_ref()).await;
                    Err(e)
                }
            };
        }

        let result = self.run(None).await;
        release(&self.name, lock.as_ref()).await;
        result.map(|()| TickOutcome::Ran)
    }

    async fn run(&self, lock: Option<SerializedLock>) -> Result<(), ScheduleError> {
        std::panic::AssertUnwindSafe((self.callback)(lock))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ScheduleError::Task("scheduled task panicked".into())))
    }
}

async fn release(task: &str, lock: &dyn Lock) {
    if let Err(e) = lock.force_release().await {
        tracing::warn!(task, key = lock.key(), error = %e, "Failed to release lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{JobError, MemoryLockProvider};

    fn pending(name: &str) -> PendingSchedule {
        let callback: TaskCallback =
            Arc::new(|_lock: Option<SerializedLock>| -> TaskFuture { Box::pin(async { Ok(()) }) });
        PendingSchedule::new(
            name,
            callback,
            resolver_for(MemoryLockProvider::new()),
            Arc::new(ScheduleRegistry::new()),
        )
    }

    fn resolver_for(provider: MemoryLockProvider) -> LockProviderResolver {
        Arc::new(move || -> Result<Arc<dyn LockProvider>, ScheduleError> {
            Ok(Arc::new(provider.clone()))
        })
    }

    #[test]
    fn build_requires_a_pattern() {
        assert!(matches!(
            pending("task").build(),
            Err(ScheduleError::MissingPattern)
        ));
        let task = pending("task").cron("*/5 * * * * *").build().unwrap();
        assert_eq!(task.cron_pattern(), "*/5 * * * * *");
        assert_eq!(task.lock_options(), LockOptions::default());
    }

    #[test]
    fn on_is_limited_to_weekly_or_larger() {
        let schedule = pending("task")
            .every(ScheduleInterval::Week)
            .on(DayOfWeek::Monday)
            .unwrap()
            .at("09:30")
            .unwrap();
        assert_eq!(schedule.cron_pattern(), Some("0 30 9 * * Mon"));

        let result = pending("task").every(ScheduleInterval::Day).on(DayOfWeek::Monday);
        assert!(matches!(
            result,
            Err(ScheduleError::DayOfWeekNotAllowed(ScheduleInterval::Day))
        ));
    }

    #[test]
    fn at_is_limited_to_daily_or_larger() {
        let schedule = pending("task").every(ScheduleInterval::Day).at("14:05").unwrap();
        assert_eq!(schedule.cron_pattern(), Some("0 5 14 * * *"));

        let result = pending("task").every(ScheduleInterval::Hour).at("14:05");
        assert!(matches!(
            result,
            Err(ScheduleError::TimeNotAllowed(ScheduleInterval::Hour))
        ));
    }

    #[test]
    fn builder_options_reach_the_task() {
        let task = pending("task")
            .every(ScheduleInterval::Minute)
            .lock_for(Duration::from_secs(5))
            .overlapping()
            .named("renamed")
            .build()
            .unwrap();
        assert_eq!(task.name(), "renamed");
        assert_eq!(task.lock_key(), lock_key("renamed"));
        assert_eq!(task.lock_options().ttl, Duration::from_secs(5));
        assert!(task.lock_options().overlap);
    }

    #[tokio::test]
    async fn panicking_callback_still_releases_the_lock() {
        let provider = MemoryLockProvider::new();
        let callback: TaskCallback = Arc::new(|_lock: Option<SerializedLock>| -> TaskFuture {
            Box::pin(async {
                if true {
                    panic!("boom");
                }
                Err(ScheduleError::Task(JobError::from("unreachable")))
            })
        });

        let task = PendingSchedule::new(
            "panics",
            callback,
            resolver_for(provider.clone()),
            Arc::new(ScheduleRegistry::new()),
        )
        .every(ScheduleInterval::Second)
        .build()
        .unwrap();

        assert!(matches!(task.tick().await, Err(ScheduleError::Task(_))));
        assert!(!provider.is_locked(&task.lock_key()));
    }
}
