//! In-process broker backed by ractor actors.
//!
//! Each registered pipeline gets a `QueueActor` holding its jobs; consuming
//! a pipeline spawns `concurrency` `WorkerActor`s that lease jobs from it.
//! Nothing survives a restart.
//!
//! Pipeline options:
//! - `concurrency`: number of workers while consuming (default 1, at most 256)
//! - `size`: maximum number of waiting jobs (default unbounded)
//! - `dead_letters`: dead-lettered jobs kept for inspection (default 1000)

mod messages;
mod queue_actor;
mod worker_actor;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use jobs_core::{BrokerStat, Job, JobId};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use messages::DeadLetter;

use crate::broker::{Broker, BrokerFuture, Consumer};
use crate::error::BrokerError;
use crate::pipeline::Pipeline;
use messages::{QueueMessage, WorkerMessage};
use queue_actor::{DEFAULT_DEAD_LIMIT, QueueActor, QueueArgs};
use worker_actor::{WorkerActor, WorkerArgs};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_POLL: Duration = Duration::from_millis(20);
const MAX_CONCURRENCY: i64 = 256;

#[derive(Debug, Clone, Copy)]
struct Settings {
    concurrency: usize,
    size: Option<usize>,
    dead_limit: usize,
}

type Spawned<M> = (ActorRef<M>, JoinHandle<()>);

#[derive(Default)]
struct Inner {
    settings: RwLock<HashMap<String, Settings>>,
    queues: Mutex<HashMap<String, Spawned<QueueMessage>>>,
    workers: Mutex<HashMap<String, Vec<Spawned<WorkerMessage>>>>,
}

/// Ephemeral in-memory broker. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct EphemeralBroker {
    inner: Arc<Inner>,
}

impl EphemeralBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs of `pipeline` that exhausted their attempts.
    pub async fn dead_letters(&self, pipeline: &str) -> Result<Vec<DeadLetter>, BrokerError> {
        match self.existing_queue(pipeline).await? {
            Some(queue) => call(&queue, |reply| QueueMessage::DeadLetters { reply }).await,
            None => Ok(Vec::new()),
        }
    }

    fn settings(&self, pipeline: &str) -> Result<Settings, BrokerError> {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pipeline)
            .copied()
            .ok_or_else(|| BrokerError::UnknownPipeline(pipeline.to_string()))
    }

    /// Queue actor for a registered pipeline, if it was started.
    async fn existing_queue(
        &self,
        pipeline: &str,
    ) -> Result<Option<ActorRef<QueueMessage>>, BrokerError> {
        self.settings(pipeline)?;
        let queues = self.inner.queues.lock().await;
        Ok(queues.get(pipeline).map(|(queue, _)| queue.clone()))
    }

    /// Queue actor for a registered pipeline, started on first use.
    async fn queue(&self, pipeline: &str) -> Result<ActorRef<QueueMessage>, BrokerError> {
        let settings = self.settings(pipeline)?;
        let mut queues = self.inner.queues.lock().await;
        if let Some((queue, _)) = queues.get(pipeline) {
            return Ok(queue.clone());
        }

        let args = QueueArgs {
            pipeline: pipeline.to_string(),
            size: settings.size,
            dead_limit: settings.dead_limit,
        };
        let (queue, handle) = Actor::spawn(None, QueueActor, args)
            .await
            .map_err(|e| BrokerError::Unavailable(format!("failed to spawn queue: {}", e)))?;

        queues.insert(pipeline.to_string(), (queue.clone(), handle));
        Ok(queue)
    }

    async fn stop_workers(workers: Vec<Spawned<WorkerMessage>>) {
        let handles: Vec<_> = workers
            .into_iter()
            .map(|(worker, handle)| {
                worker.stop(None);
                handle
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!("Worker task failed: {}", e);
            }
        }
    }
}

async fn call<T, F>(queue: &ActorRef<QueueMessage>, msg: F) -> Result<T, BrokerError>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> QueueMessage,
{
    match ractor::rpc::call(queue, msg, Some(CALL_TIMEOUT)).await {
        Ok(CallResult::Success(value)) => Ok(value),
        Ok(CallResult::Timeout) => Err(BrokerError::Unavailable("queue timed out".into())),
        Ok(CallResult::SenderError) => Err(BrokerError::Unavailable("queue dropped request".into())),
        Err(e) => Err(BrokerError::Unavailable(e.to_string())),
    }
}

impl Broker for EphemeralBroker {
    fn register(&self, pipeline: &Pipeline) -> Result<(), BrokerError> {
        let concurrency = pipeline.integer("concurrency", 1);
        if concurrency > MAX_CONCURRENCY {
            return Err(BrokerError::InvalidOption {
                option: "concurrency".into(),
                reason: format!("{} exceeds the limit of {}", concurrency, MAX_CONCURRENCY),
            });
        }
        let size = pipeline.integer("size", 0);
        let dead_limit = pipeline.integer("dead_letters", DEFAULT_DEAD_LIMIT as i64);
        let settings = Settings {
            concurrency: concurrency.max(1) as usize,
            size: (size > 0).then_some(size as usize),
            dead_limit: dead_limit.max(0) as usize,
        };

        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pipeline.name().to_string(), settings);
        Ok(())
    }

    fn push<'a>(&'a self, pipeline: &'a Pipeline, job: Job) -> BrokerFuture<'a, JobId> {
        Box::pin(async move {
            let queue = self.queue(pipeline.name()).await?;
            call(&queue, |reply| QueueMessage::Push {
                job: Box::new(job),
                reply,
            })
            .await?
            .map_err(BrokerError::Rejected)
        })
    }

    fn consume<'a>(&'a self, pipeline: &'a Pipeline, consumer: Consumer) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let settings = self.settings(pipeline.name())?;
            let queue = self.queue(pipeline.name()).await?;

            let mut workers = self.inner.workers.lock().await;
            if workers.contains_key(pipeline.name()) {
                return Err(BrokerError::AlreadyConsuming(pipeline.name().to_string()));
            }

            let mut spawned = Vec::with_capacity(settings.concurrency);
            for n in 0..settings.concurrency {
                let args = WorkerArgs {
                    worker_id: format!("{}-{}", pipeline.name(), n + 1),
                    queue: queue.clone(),
                    consumer: consumer.clone(),
                    idle: IDLE_POLL,
                };
                match Actor::spawn(None, WorkerActor, args).await {
                    Ok(worker) => spawned.push(worker),
                    Err(e) => {
                        Self::stop_workers(spawned).await;
                        return Err(BrokerError::Unavailable(format!(
                            "failed to spawn worker: {}",
                            e
                        )));
                    }
                }
            }

            tracing::debug!(
                pipeline = %pipeline.name(),
                workers = spawned.len(),
                "Ephemeral pipeline consuming"
            );
            workers.insert(pipeline.name().to_string(), spawned);
            Ok(())
        })
    }

    fn stop_consuming<'a>(&'a self, pipeline: &'a Pipeline) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            let workers = self
                .inner
                .workers
                .lock()
                .await
                .remove(pipeline.name())
                .ok_or_else(|| BrokerError::NotConsuming(pipeline.name().to_string()))?;

            Self::stop_workers(workers).await;
            Ok(())
        })
    }

    fn stat<'a>(&'a self, pipeline: &'a Pipeline) -> BrokerFuture<'a, BrokerStat> {
        Box::pin(async move {
            match self.existing_queue(pipeline.name()).await? {
                Some(queue) => call(&queue, |reply| QueueMessage::Stat { reply }).await,
                None => Ok(BrokerStat::default()),
            }
        })
    }

    fn shutdown(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            let workers: Vec<_> = self
                .inner
                .workers
                .lock()
                .await
                .drain()
                .flat_map(|(_, workers)| workers)
                .collect();
            Self::stop_workers(workers).await;

            let queues: Vec<_> = self.inner.queues.lock().await.drain().collect();
            for (pipeline, (queue, handle)) in queues {
                let _ = queue.send_message(QueueMessage::Shutdown);
                if let Err(e) = handle.await {
                    tracing::warn!("Queue {} failed to stop: {}", pipeline, e);
                }
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for EphemeralBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralBroker").finish_non_exhaustive()
    }
}
