//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job identity and fully-qualified name encoding
//! - Worker, stop and connection configuration
//! - The distributed lock contract and an in-memory lock store
//! - Events and errors

mod error;
mod events;
mod job;
pub mod lock;
mod queue;

pub use error::{ErrorKind, JobError, LockError, QueueError};
pub use events::QueueEvent;
pub use job::{
    Job, JobId, LOCK_FIELD, NAME_SEPARATOR, QualifiedName, WRAPPED_FIELD, compile_name,
    parse_name, validate_queue_name,
};
pub use lock::{Lock, LockProvider, MemoryLockProvider, SerializedLock, lock_key};
pub use queue::{
    ConnectionSettings, DEFAULT_CONCURRENCY, DEFAULT_STOP_TIMEOUT, DriverKind, QueueSettings,
    QueueSettingsEntry, StopOptions, WorkerOptions,
};
