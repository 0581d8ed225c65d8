//! Job identity: the descriptor of a unit of work and its addressing on a backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::QueueError;
use crate::lock::SerializedLock;

/// Separator between the queue and the job type in a fully-qualified name.
pub const NAME_SEPARATOR: char = '_';

/// Payload field carrying a lock handed off by the scheduler.
pub const LOCK_FIELD: &str = "_lock";

/// Field holding a payload that had to be wrapped to carry a lock.
pub const WRAPPED_FIELD: &str = "_payload";

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(queue, job type)` pair decoded from a fully-qualified name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub queue: String,
    pub name: String,
}

/// Encode a queue and a job type into a fully-qualified name.
pub fn compile_name(queue: &str, name: &str) -> String {
    format!("{queue}{NAME_SEPARATOR}{name}")
}

/// Decode a fully-qualified name, splitting on the first separator only.
///
/// Returns `None` when the separator is missing or either side is empty.
pub fn parse_name(fully_qualified: &str) -> Option<QualifiedName> {
    let (queue, name) = fully_qualified.split_once(NAME_SEPARATOR)?;
    if queue.is_empty() || name.is_empty() {
        return None;
    }
    Some(QualifiedName {
        queue: queue.to_string(),
        name: name.to_string(),
    })
}

/// Check that a queue name can be encoded without ambiguity.
pub fn validate_queue_name(queue: &str) -> Result<(), QueueError> {
    if queue.is_empty() || queue.contains(NAME_SEPARATOR) {
        return Err(QueueError::InvalidQueueName(queue.to_string()));
    }
    Ok(())
}

/// A job represents a unit of work dispatched to a queue connection.
///
/// `connection` and `queue` stay unset until the orchestrator resolves
/// them to the defaults of the selected driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Logical job type, used to route to a registered handler.
    pub name: String,
    /// Target connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Target queue within the connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Job payload as JSON.
    pub payload: serde_json::Value,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job of the given type.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            connection: None,
            queue: None,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Create a new job from a typed payload.
    pub fn with_payload<P: Serialize>(
        name: impl Into<String>,
        payload: &P,
    ) -> Result<Self, QueueError> {
        Ok(Self::new(name, serde_json::to_value(payload)?))
    }

    /// Route this job to a specific connection.
    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Route this job to a specific queue.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// The `queue + separator + name` address of this job.
    pub fn fully_qualified_name(&self) -> Result<String, QueueError> {
        let queue = self.queue.as_deref().ok_or(QueueError::QueueNotSet)?;
        Ok(compile_name(queue, &self.name))
    }

    /// A fresh job with the same routing and payload but a new identity.
    pub fn respawn(&self) -> Self {
        Self {
            id: JobId::new(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Attach a handed-off lock under the reserved payload field.
    ///
    /// Payloads that are not objects are moved under [`WRAPPED_FIELD`] first,
    /// and [`Job::take_lock`] moves them back.
    pub fn attach_lock(&mut self, lock: &SerializedLock) -> Result<(), QueueError> {
        let lock = serde_json::to_value(lock)?;
        if !matches!(&self.payload, serde_json::Value::Object(map) if !is_wrapped(map)) {
            let mut map = serde_json::Map::new();
            map.insert(WRAPPED_FIELD.to_string(), self.payload.take());
            self.payload = serde_json::Value::Object(map);
        }
        if let serde_json::Value::Object(map) = &mut self.payload {
            map.insert(LOCK_FIELD.to_string(), lock);
        }
        Ok(())
    }

    /// Remove and decode a handed-off lock from the payload, if any.
    ///
    /// Restores the original payload exactly as it was before
    /// [`Job::attach_lock`].
    pub fn take_lock(&mut self) -> Result<Option<SerializedLock>, QueueError> {
        let serde_json::Value::Object(map) = &mut self.payload else {
            return Ok(None);
        };
        let Some(value) = map.remove(LOCK_FIELD) else {
            return Ok(None);
        };
        if is_wrapped(map)
            && let Some(original) = map.remove(WRAPPED_FIELD)
        {
            self.payload = original;
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// An object holding nothing but a wrapped payload.
fn is_wrapped(map: &serde_json::Map<String, serde_json::Value>) -> bool {
    map.len() == 1 && map.contains_key(WRAPPED_FIELD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_inverts_compile() {
        for (queue, name) in [("default", "SendEmail"), ("high-throughput", "a_b_c")] {
            let parsed = parse_name(&compile_name(queue, name)).unwrap();
            assert_eq!(parsed.queue, queue);
            assert_eq!(parsed.name, name);
        }
    }

    #[test]
    fn parse_splits_on_first_separator() {
        let parsed = parse_name("emails_send_welcome_mail").unwrap();
        assert_eq!(parsed.queue, "emails");
        assert_eq!(parsed.name, "send_welcome_mail");
    }

    #[test]
    fn parse_rejects_unqualified_names() {
        assert!(parse_name("nosep").is_none());
        assert!(parse_name("_job").is_none());
        assert!(parse_name("queue_").is_none());
    }

    #[test]
    fn queue_names_with_separator_are_rejected() {
        assert!(validate_queue_name("default").is_ok());
        assert!(matches!(
            validate_queue_name("heavy_tasks"),
            Err(QueueError::InvalidQueueName(_))
        ));
        assert!(validate_queue_name("").is_err());
    }

    #[test]
    fn fully_qualified_name_requires_queue() {
        let job = Job::new("report", json!({}));
        assert!(matches!(job.fully_qualified_name(), Err(QueueError::QueueNotSet)));

        let job = job.on_queue("reports");
        assert_eq!(job.fully_qualified_name().unwrap(), "reports_report");
    }

    #[test]
    fn lock_round_trips_through_payload() {
        let lock = SerializedLock {
            key: "queue:schedule:abcd1234".into(),
            owner: "owner-1".into(),
            ttl_ms: Some(3000),
            remaining_ms: Some(2500),
        };

        let mut job = Job::new("report", json!({ "day": 3 }));
        job.attach_lock(&lock).unwrap();
        assert!(job.payload.get(LOCK_FIELD).is_some());

        let restored = job.take_lock().unwrap();
        assert_eq!(restored, Some(lock));
        assert_eq!(job.payload, json!({ "day": 3 }));
    }

    #[test]
    fn non_object_payloads_survive_a_lock_round_trip() {
        let lock = SerializedLock {
            key: "k".into(),
            owner: "o".into(),
            ttl_ms: None,
            remaining_ms: None,
        };
        let payloads = [
            json!(5),
            json!([1, 2]),
            json!("text"),
            json!(null),
            json!({}),
            json!({ "_payload": 7 }),
        ];
        for payload in payloads {
            let mut job = Job::new("report", payload.clone());
            job.attach_lock(&lock).unwrap();
            assert!(job.payload.get(LOCK_FIELD).is_some());

            assert_eq!(job.take_lock().unwrap(), Some(lock.clone()));
            assert_eq!(job.payload, payload);
        }
    }

    #[test]
    fn respawn_keeps_routing_with_new_identity() {
        let job = Job::new("report", json!({})).on_connection("main").on_queue("default");
        let next = job.respawn();
        assert_ne!(job.id, next.id);
        assert_eq!(next.connection.as_deref(), Some("main"));
        assert_eq!(next.queue.as_deref(), Some("default"));
    }
}
