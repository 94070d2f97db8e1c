//! Worker actor that pulls jobs from a queue actor and runs the consumer.

use std::time::Duration;

use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};

use super::messages::{QueueMessage, WorkerMessage};
use crate::broker::Consumer;
use crate::error::BrokerError;

const RESERVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: ActorRef<QueueMessage>,
    pub consumer: Consumer,
    /// Pause between polls when the queue is empty.
    pub idle: Duration,
}

/// State for the worker actor.
pub struct WorkerActorState {
    worker_id: String,
    queue: ActorRef<QueueMessage>,
    consumer: Consumer,
    idle: Duration,
}

/// Worker actor that executes one job at a time.
///
/// Stopping the actor lets the job in `handle` finish first.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queue: args.queue,
            consumer: args.consumer,
            idle: args.idle,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::debug!("Worker stopped: {}", state.worker_id);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let reserved = ractor::rpc::call(
                    &state.queue,
                    |reply| QueueMessage::Reserve { reply },
                    Some(RESERVE_TIMEOUT),
                )
                .await;

                let delivery = match reserved {
                    Ok(CallResult::Success(delivery)) => delivery,
                    Ok(CallResult::Timeout) => None,
                    Ok(CallResult::SenderError) | Err(_) => {
                        state.consumer.fail(BrokerError::Unavailable(format!(
                            "queue for pipeline '{}' is gone",
                            state.consumer.pipeline()
                        )));
                        myself.stop(None);
                        return Ok(());
                    }
                };

                let Some(delivery) = delivery else {
                    // idle; poll again later
                    let next = myself.clone();
                    let idle = state.idle;
                    tokio::spawn(async move {
                        tokio::time::sleep(idle).await;
                        let _ = next.send_message(WorkerMessage::Poll);
                    });
                    return Ok(());
                };

                let id = delivery.id.clone();
                let outcome = state.consumer.handle(delivery.id, delivery.job).await;
                let report = match outcome {
                    Ok(()) => QueueMessage::Ack {
                        id,
                        attempt: delivery.attempt,
                    },
                    Err(error) => QueueMessage::Nack {
                        id,
                        attempt: delivery.attempt,
                        error,
                    },
                };
                if state.queue.send_message(report).is_err() {
                    tracing::warn!(worker = %state.worker_id, "Queue stopped before job outcome was reported");
                }

                // stopping workers drop this
                let _ = myself.send_message(WorkerMessage::Poll);
            }
        }

        Ok(())
    }
}
