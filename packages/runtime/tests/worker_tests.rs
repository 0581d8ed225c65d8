#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use queue_core::{Job, JobError, QueueError, QueueEvent, StopOptions};
use queue_runtime::{FnHandler, Queue, QueueConfig, QueueDriver, ScheduleRegistry};
use serde_json::json;

use common::{Probe, memory_settings, wait_until};

fn queue_with(probe: &Probe, concurrency: u32, delay: Duration) -> Result<Queue, QueueError> {
    let config =
        QueueConfig::new(memory_settings(concurrency)).with_handler(probe.handler("work", delay));
    Queue::new(config, Arc::new(ScheduleRegistry::new()))
}

#[tokio::test]
async fn concurrency_one_runs_jobs_back_to_back() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(300))?;
    queue.start().await?;

    let started = Instant::now();
    queue.enqueue(Job::new("work", json!({}))).await?;
    queue.enqueue(Job::new("work", json!({}))).await?;

    assert!(wait_until(Duration::from_secs(3), || probe.completed() == 2).await);
    assert_eq!(probe.peak(), 1);
    assert!(started.elapsed() >= Duration::from_millis(600));

    queue.stop(StopOptions::default()).await?;
    Ok(())
}

#[tokio::test]
async fn concurrency_bounds_parallel_executions() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 2, Duration::from_millis(200))?;
    queue.start().await?;

    for _ in 0..6 {
        queue.enqueue(Job::new("work", json!({}))).await?;
    }

    assert!(wait_until(Duration::from_secs(3), || probe.completed() == 6).await);
    assert_eq!(probe.peak(), 2);

    queue.stop(StopOptions::default()).await?;
    Ok(())
}

#[tokio::test]
async fn graceful_stop_waits_for_in_flight_jobs() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(400))?;
    queue.start().await?;

    queue.enqueue(Job::new("work", json!({}))).await?;
    assert!(wait_until(Duration::from_secs(1), || probe.started() == 1).await);

    queue.stop(StopOptions::graceful(Duration::from_secs(5))).await?;
    assert_eq!(probe.completed(), 1);
    Ok(())
}

#[tokio::test]
async fn graceful_stop_returns_as_soon_as_the_last_job_finishes() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(250))?;
    queue.start().await?;

    queue.enqueue(Job::new("work", json!({}))).await?;
    assert!(wait_until(Duration::from_secs(1), || probe.started() == 1).await);

    let started = Instant::now();
    queue.stop(StopOptions::graceful(Duration::from_secs(5))).await?;
    let elapsed = started.elapsed();

    assert_eq!(probe.completed(), 1);
    assert!(elapsed < Duration::from_millis(300), "stop took {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn graceful_stop_times_out_and_leaves_jobs_running() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(800))?;
    queue.start().await?;

    queue.enqueue(Job::new("work", json!({}))).await?;
    assert!(wait_until(Duration::from_secs(1), || probe.started() == 1).await);

    let result = queue.stop(StopOptions::graceful(Duration::from_millis(100))).await;
    let error = result.expect_err("stop should time out");
    assert!(error.is_shutdown_timeout());
    assert_eq!(probe.completed(), 0);

    // The abandoned job still runs to completion.
    assert!(wait_until(Duration::from_secs(2), || probe.completed() == 1).await);
    Ok(())
}

#[tokio::test]
async fn immediate_stop_does_not_wait() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_secs(1))?;
    queue.start().await?;

    queue.enqueue(Job::new("work", json!({}))).await?;
    assert!(wait_until(Duration::from_secs(1), || probe.started() == 1).await);

    let started = Instant::now();
    queue.stop(StopOptions::immediate()).await?;
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(probe.completed(), 0);
    Ok(())
}

#[tokio::test]
async fn enqueue_is_rejected_while_stopping() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(500))?;
    queue.start().await?;

    queue.enqueue(Job::new("work", json!({}))).await?;
    assert!(wait_until(Duration::from_secs(1), || probe.started() == 1).await);

    let stopping = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.stop(StopOptions::default()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let driver = queue.driver(None)?;
    let result = driver.enqueue(Job::new("work", json!({}))).await;
    assert!(matches!(result, Err(QueueError::ShuttingDown)));

    stopping.await??;
    Ok(())
}

#[tokio::test]
async fn dispatch_to_unregistered_targets_fails() -> Result<(), Box<dyn Error>> {
    let probe = Probe::new();
    let queue = queue_with(&probe, 1, Duration::from_millis(10))?;

    let result = queue
        .enqueue(Job::new("work", json!({})).on_queue("default"))
        .await;
    assert!(matches!(result, Err(QueueError::NotStarted)));

    queue.start().await?;

    let result = queue.enqueue(Job::new("unknown", json!({}))).await;
    assert!(matches!(result, Err(QueueError::JobNotRegistered(name)) if name == "unknown"));

    let result = queue
        .enqueue(Job::new("work", json!({})).on_queue("missing"))
        .await;
    assert!(matches!(result, Err(QueueError::QueueNotRegistered(name)) if name == "missing"));

    let result = queue
        .enqueue(Job::new("work", json!({})).on_connection("nowhere"))
        .await;
    assert!(matches!(result, Err(QueueError::ConnectionNotFound(name)) if name == "nowhere"));

    assert_eq!(probe.started(), 0);
    queue.stop(StopOptions::default()).await?;
    Ok(())
}

#[tokio::test]
async fn handler_failures_are_reported_as_events() -> Result<(), Box<dyn Error>> {
    let config = QueueConfig::new(memory_settings(1)).with_job(FnHandler::new(
        "explode",
        |_ctx, _payload| async { Err::<(), _>(JobError::from("kaboom")) },
    ));
    let queue = Queue::new(config, Arc::new(ScheduleRegistry::new()))?;
    let mut events = queue.subscribe();
    queue.start().await?;

    // Dispatch succeeds; the failure only shows up on the event channel.
    let id = queue.enqueue(Job::new("explode", json!({ "n": 1 }))).await?;

    let failed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(QueueEvent::JobFailed { job, error, .. }) => return Some((job, error)),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    })
    .await?;

    let (job, error) = failed.expect("a JobFailed event");
    assert_eq!(job.id, id);
    assert_eq!(job.payload, json!({ "n": 1 }));
    assert_eq!(job.queue.as_deref(), Some("default"));
    assert!(error.contains("kaboom"));

    queue.stop(StopOptions::default()).await?;
    Ok(())
}
