//! Queue runtime: drivers, workers, scheduling and orchestration.
//!
//! # Architecture
//!
//! - `QueueDriver` - Lifecycle contract every backend implements, composing a `DriverCore`
//! - `MemoryQueueDriver` - In-process backend with one `PoolActor` per queue and job type
//! - `Queue` - Orchestrator owning one driver per named connection
//! - `PendingSchedule` / `ScheduledTask` - Cron ticks guarded by a distributed lock,
//!   optionally handed off to the dispatched job and kept alive by a `Heartbeat`
//! - `ScheduleRegistry` - Named registry of active cron triggers
//!
//! # Usage
//!
//! ```ignore
//! use queue_runtime::{FnHandler, Queue, QueueConfig, ScheduleRegistry, ScheduleInterval};
//! use queue_core::{Job, QueueSettings, StopOptions};
//!
//! let config = QueueConfig::new(QueueSettings::memory())
//!     .with_job(FnHandler::new("cleanup", |_ctx, _payload| async { Ok(()) }));
//! let queue = Queue::new(config, Arc::new(ScheduleRegistry::new()))?;
//! queue.start().await?;
//!
//! queue.enqueue(Job::new("cleanup", json!({}))).await?;
//! queue
//!     .schedule(Job::new("cleanup", json!({})))
//!     .every(ScheduleInterval::FiveMinutes)
//!     .submit()
//!     .await?;
//!
//! queue.stop(StopOptions::default()).await?;
//! ```

mod driver;
mod handler;
mod heartbeat;
mod memory;
mod messages;
mod pool_actor;
mod queue;
pub mod schedule;

pub use driver::{Delivery, DriverCore, DriverFactory, DriverFuture, DriverSettings, QueueDriver};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobContext, JobHandler, JobHandlerRegistry,
    TypedHandler,
};
pub use heartbeat::Heartbeat;
pub use memory::{MemoryDriverFactory, MemoryQueueDriver, memory};
pub use messages::{PoolMessage, PoolStats};
pub use pool_actor::PoolActor;
pub use queue::{Queue, QueueConfig};
pub use schedule::{
    DayOfWeek, IntervalCronOptions, LockOptions, PendingSchedule, ScheduleError,
    ScheduleInterval, ScheduleRegistry, ScheduledTask, Scheduler, TickOutcome,
};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
