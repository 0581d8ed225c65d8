//! Recurring task scheduling with distributed overlap protection.

mod interval;
mod pending;
mod registry;
mod scheduler;

pub use interval::{DayOfWeek, IntervalCronOptions, ScheduleInterval, parse_time};
pub use pending::{
    DEFAULT_LOCK_TTL, LockOptions, LockProviderResolver, PendingSchedule, ScheduledTask,
    TaskCallback, TaskFuture, TickOutcome,
};
pub use registry::ScheduleRegistry;
pub use scheduler::Scheduler;

use queue_core::{JobError, LockError, QueueError};
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors raised while building, registering or ticking schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("No schedule pattern defined. To schedule a task, set an interval or cron pattern")]
    MissingPattern,

    #[error(".on() can only be used for weekly intervals or larger. Current interval: '{0}'")]
    DayOfWeekNotAllowed(ScheduleInterval),

    #[error(".at() can only be used for daily intervals or larger. Current interval: '{0}'")]
    TimeNotAllowed(ScheduleInterval),

    #[error("Invalid time format '{0}', expected HH:MM")]
    TimeFormat(String),

    #[error("Time out of range: {0}")]
    InvalidTime(String),

    #[error("Unknown schedule interval: {0}")]
    UnknownInterval(String),

    #[error("Unknown day of week: {0}")]
    UnknownDayOfWeek(String),

    #[error("Cron instance with name '{0}' already exists")]
    Duplicate(String),

    #[error("Cron scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Scheduled task failed: {0}")]
    Task(#[from] JobError),

    #[error("Queue was dropped before the schedule fired")]
    QueueDropped,
}
