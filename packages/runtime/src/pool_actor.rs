//! Worker pool actor for one `(queue, job type)` pair.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::Notify;

use crate::driver::{Delivery, DriverCore};
use crate::messages::{PoolMessage, PoolStats};

/// Jobs executing across every pool of a driver.
#[derive(Debug, Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once no job is executing.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent finish is not missed.
            let idle = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Arguments for spawning a pool.
pub struct PoolArguments {
    pub fully_qualified_name: String,
    pub concurrency: u32,
    pub core: Arc<DriverCore>,
    pub running: Arc<InFlight>,
}

/// State for the pool actor.
pub struct PoolActorState {
    fully_qualified_name: String,
    concurrency: u32,
    paused: bool,
    pending: VecDeque<Delivery>,
    in_flight: usize,
    core: Arc<DriverCore>,
    running: Arc<InFlight>,
}

impl PoolActorState {
    fn stats(&self) -> PoolStats {
        PoolStats {
            pending: self.pending.len(),
            in_flight: self.in_flight,
            concurrency: self.concurrency,
            paused: self.paused,
        }
    }

    /// Start pending jobs until the pool is full.
    fn drain(&mut self, myself: &ActorRef<PoolMessage>) {
        while !self.paused && self.in_flight < self.concurrency as usize {
            let Some(delivery) = self.pending.pop_front() else {
                break;
            };

            self.in_flight += 1;
            // Counted before the task exists so a concurrent stop never sees zero early.
            self.running.begin();

            let core = self.core.clone();
            let running = self.running.clone();
            let myself = myself.clone();
            tokio::spawn(async move {
                // Failures are already reported on the event channel.
                let _ = core.process(delivery).await;
                running.finish();
                let _ = myself.send_message(PoolMessage::Finished);
            });
        }
    }
}

/// Pool actor bounding concurrent executions of one job type on one queue.
///
/// Pools start paused and only pull work once resumed.
pub struct PoolActor;

impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolActorState;
    type Arguments = PoolArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::trace!(
            connection = args.core.connection(),
            pool = %args.fully_qualified_name,
            concurrency = args.concurrency,
            "Started worker"
        );

        Ok(PoolActorState {
            fully_qualified_name: args.fully_qualified_name,
            concurrency: args.concurrency,
            paused: true,
            pending: VecDeque::new(),
            in_flight: 0,
            core: args.core,
            running: args.running,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Push { delivery } => {
                state.pending.push_back(*delivery);
                state.drain(&myself);
            }

            PoolMessage::Pause => {
                state.paused = true;
            }

            PoolMessage::Resume => {
                state.paused = false;
                state.drain(&myself);
            }

            PoolMessage::Finished => {
                state.in_flight = state.in_flight.saturating_sub(1);
                state.drain(&myself);
            }

            PoolMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.pending.is_empty() {
            tracing::debug!(
                pool = %state.fully_qualified_name,
                discarded = state.pending.len(),
                "Worker stopped with pending jobs"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use queue_core::{Job, JobError};

    use crate::driver::DriverSettings;
    use crate::handler::FnHandler;

    async fn stats(pool: &ActorRef<PoolMessage>) -> PoolStats {
        match ractor::rpc::call(pool, |reply| PoolMessage::GetStats { reply }, None).await {
            Ok(ractor::rpc::CallResult::Success(stats)) => stats,
            _ => panic!("stats call failed"),
        }
    }

    fn core_with_slow_job() -> Arc<DriverCore> {
        let core = Arc::new(DriverCore::new(DriverSettings {
            connection: "main".to_string(),
            queues: Vec::new(),
            worker: true,
        }));
        core.register(Arc::new(FnHandler::new("slow", |_ctx, _payload| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<(), JobError>(())
        })));
        core
    }

    fn delivery() -> Box<Delivery> {
        let job = Job::new("slow", serde_json::json!({}));
        Box::new(Delivery::from_job(job, "default_slow".to_string()))
    }

    #[tokio::test]
    async fn paused_pool_holds_work_until_resumed() {
        let running = Arc::new(InFlight::new());
        let (pool, handle) = Actor::spawn(
            None,
            PoolActor,
            PoolArguments {
                fully_qualified_name: "default_slow".to_string(),
                concurrency: 1,
                core: core_with_slow_job(),
                running: running.clone(),
            },
        )
        .await
        .unwrap();

        pool.send_message(PoolMessage::Push { delivery: delivery() }).unwrap();
        pool.send_message(PoolMessage::Push { delivery: delivery() }).unwrap();
        let before = stats(&pool).await;
        assert!(before.paused);
        assert_eq!(before.pending, 2);
        assert_eq!(before.in_flight, 0);

        pool.send_message(PoolMessage::Resume).unwrap();
        let after = stats(&pool).await;
        assert_eq!(after.in_flight, 1);
        assert_eq!(after.pending, 1);
        assert_eq!(running.count(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let done = stats(&pool).await;
        assert_eq!(done.in_flight, 0);
        assert_eq!(done.pending, 0);
        assert_eq!(running.count(), 0);

        pool.stop(None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_concurrency_never_drains() {
        let (pool, handle) = Actor::spawn(
            None,
            PoolActor,
            PoolArguments {
                fully_qualified_name: "default_slow".to_string(),
                concurrency: 0,
                core: core_with_slow_job(),
                running: Arc::new(InFlight::new()),
            },
        )
        .await
        .unwrap();

        pool.send_message(PoolMessage::Resume).unwrap();
        pool.send_message(PoolMessage::Push { delivery: delivery() }).unwrap();
        let stats = stats(&pool).await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_flight, 0);

        pool.stop(None);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_idle_wakes_when_the_last_job_finishes() {
        let running = Arc::new(InFlight::new());
        running.begin();
        running.begin();

        let waiter = {
            let running = running.clone();
            tokio::spawn(async move { running.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        running.finish();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        running.finish();
        tokio::time::timeout(Duration::from_millis(50), waiter)
            .await
            .expect("waiter should wake immediately")
            .unwrap();
    }
}
