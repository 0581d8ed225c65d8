//! Error taxonomy shared by drivers, the orchestrator and the scheduler.

use std::time::Duration;

use thiserror::Error;

/// Broad classes of failure, each with its own handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid setup or routing. Fails fast at setup or dispatch time.
    Configuration,
    /// Lock acquire/extend/restore failures. Logged, never fatal to a running job.
    Coordination,
    /// The job's own logic failed. Reported through the event channel.
    Handler,
    /// A graceful stop missed its deadline.
    Shutdown,
    /// The driver is not in a state that accepts the operation.
    Lifecycle,
}

/// Errors raised by the lock collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock '{0}' is not held by this owner")]
    NotOwned(String),

    #[error("Lock '{0}' has expired")]
    Expired(String),

    #[error("Invalid serialized lock: {0}")]
    InvalidSerialized(String),

    #[error("Lock storage error: {0}")]
    Storage(String),
}

/// Error returned by a job handler.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<String> for JobError {
    fn from(value: String) -> Self {
        JobError::Failed(value)
    }
}

impl From<&str> for JobError {
    fn from(value: &str) -> Self {
        JobError::Failed(value.to_string())
    }
}

/// Errors raised by queue drivers and the orchestrator.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue is not set")]
    QueueNotSet,

    #[error("Queue '{0}' already registered")]
    QueueAlreadyRegistered(String),

    #[error("Queue '{0}' is not registered")]
    QueueNotRegistered(String),

    #[error("Job '{0}' is not registered")]
    JobNotRegistered(String),

    #[error("Invalid queue name '{0}': must be non-empty and must not contain '_'")]
    InvalidQueueName(String),

    #[error("Invalid job name: {0}")]
    InvalidJobName(String),

    #[error("No queues registered for connection: {0}")]
    NoQueues(String),

    #[error("No driver found for connection: {0}")]
    ConnectionNotFound(String),

    #[error("No queue drivers available")]
    NoDrivers,

    #[error("Invalid queue config: {0}")]
    Config(String),

    #[error("Queue driver is not started")]
    NotStarted,

    #[error("Queue driver is shutting down and cannot accept new jobs")]
    ShuttingDown,

    #[error("No worker found for job: {0}")]
    NoWorker(String),

    #[error("Graceful shutdown timeout reached after {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Job failed: {0}")]
    Job(#[from] JobError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Actor error: {0}")]
    Actor(String),
}

impl QueueError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueueError::QueueNotSet
            | QueueError::QueueAlreadyRegistered(_)
            | QueueError::QueueNotRegistered(_)
            | QueueError::JobNotRegistered(_)
            | QueueError::InvalidQueueName(_)
            | QueueError::InvalidJobName(_)
            | QueueError::NoQueues(_)
            | QueueError::ConnectionNotFound(_)
            | QueueError::NoDrivers
            | QueueError::Config(_)
            | QueueError::NoWorker(_)
            | QueueError::Serialization(_) => ErrorKind::Configuration,
            QueueError::Lock(_) => ErrorKind::Coordination,
            QueueError::Job(_) => ErrorKind::Handler,
            QueueError::ShutdownTimeout(_) => ErrorKind::Shutdown,
            QueueError::NotStarted | QueueError::ShuttingDown | QueueError::Actor(_) => {
                ErrorKind::Lifecycle
            }
        }
    }

    /// Whether this is the graceful-shutdown deadline error.
    pub fn is_shutdown_timeout(&self) -> bool {
        matches!(self, QueueError::ShutdownTimeout(_))
    }
}
