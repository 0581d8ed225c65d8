//! Queue configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::job::validate_queue_name;

/// Default worker concurrency when a queue does not configure one.
pub const DEFAULT_CONCURRENCY: u32 = 1;

/// Default deadline for a graceful stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-queue worker behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Max simultaneous executions of one job type on this queue.
    /// `0` disables processing while still accepting jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

impl WorkerOptions {
    pub fn with_concurrency(concurrency: u32) -> Self {
        Self {
            concurrency: Some(concurrency),
        }
    }

    /// Overlay `overrides` on top of `self`; set fields in `overrides` win.
    pub fn merge(self, overrides: Option<WorkerOptions>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };
        Self {
            concurrency: overrides.concurrency.or(self.concurrency),
        }
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }
}

/// How a driver should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopOptions {
    /// Wait for in-flight jobs before stopping.
    pub graceful: bool,
    /// How long a graceful stop may wait.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            graceful: true,
            timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl StopOptions {
    pub fn graceful(timeout: Duration) -> Self {
        Self {
            graceful: true,
            timeout,
        }
    }

    pub fn immediate() -> Self {
        Self {
            graceful: false,
            ..Self::default()
        }
    }
}

/// A named queue on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettingsEntry {
    pub name: String,
    #[serde(flatten)]
    pub options: WorkerOptions,
}

/// Backend kinds that can be described in serialized settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Memory,
}

/// One named connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub name: String,
    #[serde(default)]
    pub driver: DriverKind,
    pub queues: Vec<QueueSettingsEntry>,
}

impl ConnectionSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: DriverKind::default(),
            queues: Vec::new(),
        }
    }

    /// Add a queue to this connection.
    pub fn with_queue(mut self, name: impl Into<String>, options: WorkerOptions) -> Self {
        self.queues.push(QueueSettingsEntry {
            name: name.into(),
            options,
        });
        self
    }
}

/// Serializable part of the orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Whether this process runs workers. When false, jobs are only enqueued.
    pub worker: bool,
    /// Connection used when a job does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Connections in declaration order.
    pub connections: Vec<ConnectionSettings>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker: true,
            connection: None,
            connections: Vec::new(),
        }
    }
}

impl QueueSettings {
    /// A single `main` memory connection with a `default` queue.
    pub fn memory() -> Self {
        Self::default().with_connection(
            ConnectionSettings::new("main").with_queue("default", WorkerOptions::default()),
        )
    }

    pub fn with_connection(mut self, connection: ConnectionSettings) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn with_default_connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn with_worker(mut self, worker: bool) -> Self {
        self.worker = worker;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, QueueError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the `QUEUE_CONFIG` environment variable (JSON), falling
    /// back to [`QueueSettings::memory`].
    pub fn from_env() -> Result<Self, QueueError> {
        match std::env::var("QUEUE_CONFIG") {
            Ok(json) => Self::from_json(&json),
            Err(_) => Ok(Self::memory()),
        }
    }

    pub fn get(&self, connection: &str) -> Option<&ConnectionSettings> {
        self.connections.iter().find(|c| c.name == connection)
    }

    /// Check the settings before any driver is created.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.connections.is_empty() {
            return Err(QueueError::Config(
                "at least one connection must be defined".into(),
            ));
        }

        if let Some(default) = &self.connection
            && self.get(default).is_none()
        {
            return Err(QueueError::Config(format!(
                "missing connection '{default}' referenced as the default connection"
            )));
        }

        for (index, connection) in self.connections.iter().enumerate() {
            if self.connections[..index]
                .iter()
                .any(|other| other.name == connection.name)
            {
                return Err(QueueError::Config(format!(
                    "connection '{}' is defined twice",
                    connection.name
                )));
            }
            if connection.queues.is_empty() {
                return Err(QueueError::Config(format!(
                    "connection '{}' must have at least one queue defined",
                    connection.name
                )));
            }
            for queue in &connection.queues {
                validate_queue_name(&queue.name)?;
            }
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
