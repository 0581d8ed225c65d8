//! Queue initialization for the demo server.

use std::sync::Arc;
use std::time::Duration;

use queue_core::{Job, JobError, QueueSettings};
use queue_runtime::{FnHandler, JobContext, Queue, QueueConfig, ScheduleInterval, ScheduleRegistry};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct SleepPayload {
    #[serde(default = "default_seconds")]
    seconds: u64,
}

fn default_seconds() -> u64 {
    5
}

/// Build the queue with the demo handlers.
pub fn build_queue(
    settings: QueueSettings,
    registry: Arc<ScheduleRegistry>,
) -> Result<Queue, Box<dyn std::error::Error>> {
    let config = QueueConfig::new(settings)
        // Demo: Echo handler
        .with_job(FnHandler::new("echo", |ctx: JobContext, payload: Value| async move {
            tracing::info!(id = %ctx.id, queue = %ctx.queue, "Echo job: {}", payload);
            Ok::<(), JobError>(())
        }))
        // Demo: Sleep handler
        .with_job(FnHandler::typed(
            "sleep",
            |ctx: JobContext, payload: SleepPayload| async move {
                tracing::info!(id = %ctx.id, "Sleeping for {} seconds", payload.seconds);
                tokio::time::sleep(Duration::from_secs(payload.seconds)).await;
                Ok::<(), JobError>(())
            },
        ))
        // Demo: Failing handler
        .with_job(FnHandler::new("fail", |_ctx: JobContext, payload: Value| async move {
            let should_fail = payload.get("fail").and_then(Value::as_bool).unwrap_or(true);
            if should_fail {
                Err(JobError::from("Intentional failure"))
            } else {
                Ok(())
            }
        }));

    Ok(Queue::new(config, registry)?)
}

/// Start the queue, dispatch a few demo jobs and schedule a recurring one.
pub async fn init_job_queue(queue: &Queue) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Initializing job queue system...");
    queue.start().await?;

    queue.enqueue(Job::new("echo", json!({ "msg": "hello" }))).await?;
    queue.enqueue(Job::new("sleep", json!({ "seconds": 1 }))).await?;
    queue.enqueue(Job::new("fail", json!({}))).await?;

    let task = queue
        .schedule(Job::new("echo", json!({ "msg": "tick" })))
        .every(ScheduleInterval::TenSeconds)
        .lock_for(Duration::from_secs(5))
        .submit()
        .await?;
    tracing::info!(task = %task, "Scheduled recurring echo");

    Ok(())
}
