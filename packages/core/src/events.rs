//! Events emitted by drivers and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events broadcast on a driver's (or the orchestrator's) event channel.
///
/// Handler failures surface here as `JobFailed`; the dispatch caller
/// never sees them once the job was enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A worker started executing a job.
    JobStarted {
        job: Job,
        timestamp: DateTime<Utc>,
    },
    /// A job handler returned successfully.
    JobCompleted {
        job: Job,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job handler failed. The job carries its payload.
    JobFailed {
        job: Job,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A job finished, successfully or not.
    JobFinished {
        job: Job,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Extending a handed-off lock failed while its job kept running.
    LockExtensionFailed {
        job_id: JobId,
        key: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A driver-level failure outside any single job.
    DriverError {
        connection: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::JobStarted { timestamp, .. }
            | QueueEvent::JobCompleted { timestamp, .. }
            | QueueEvent::JobFailed { timestamp, .. }
            | QueueEvent::JobFinished { timestamp, .. }
            | QueueEvent::LockExtensionFailed { timestamp, .. }
            | QueueEvent::DriverError { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::JobStarted { job, .. }
            | QueueEvent::JobCompleted { job, .. }
            | QueueEvent::JobFailed { job, .. }
            | QueueEvent::JobFinished { job, .. } => Some(job.id),
            QueueEvent::LockExtensionFailed { job_id, .. } => Some(*job_id),
            QueueEvent::DriverError { .. } => None,
        }
    }

    /// Whether this event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            QueueEvent::JobFailed { .. }
                | QueueEvent::LockExtensionFailed { .. }
                | QueueEvent::DriverError { .. }
        )
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::JobStarted { job, .. } => format!("Job {} ({}) started", job.id, job.name),
            QueueEvent::JobCompleted {
                job, elapsed_ms, ..
            } => format!("Job {} completed in {}ms", job.id, elapsed_ms),
            QueueEvent::JobFailed { job, error, .. } => {
                format!("Job {} failed: {}", job.id, error)
            }
            QueueEvent::JobFinished {
                job, elapsed_ms, ..
            } => format!("Job {} finished after {}ms", job.id, elapsed_ms),
            QueueEvent::LockExtensionFailed {
                job_id, key, error, ..
            } => format!("Job {} could not extend lock {}: {}", job_id, key, error),
            QueueEvent::DriverError {
                connection, error, ..
            } => format!("Connection {} error: {}", connection, error),
        }
    }
}
