//! Message types for the ephemeral broker's actors.

use jobs_core::{BrokerStat, Job, JobId};
use ractor::RpcReplyPort;

/// A job handed to a worker under a lease.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: JobId,
    pub job: Job,
    /// Delivery number, starting at 1. Doubles as the lease token.
    pub attempt: u32,
}

/// A job that exhausted its attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: JobId,
    pub job: Job,
    pub attempts: u32,
    pub error: String,
}

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Enqueue a new job.
    Push {
        job: Box<Job>,
        reply: RpcReplyPort<Result<JobId, String>>,
    },

    /// Lease the next visible job.
    Reserve {
        reply: RpcReplyPort<Option<Delivery>>,
    },

    /// Job processed; drop it.
    Ack { id: JobId, attempt: u32 },

    /// Job failed; retry or dead-letter it.
    Nack {
        id: JobId,
        attempt: u32,
        error: String,
    },

    /// Get queue depth.
    Stat { reply: RpcReplyPort<BrokerStat> },

    /// List dead-lettered jobs.
    DeadLetters {
        reply: RpcReplyPort<Vec<DeadLetter>>,
    },

    /// Periodic sweep of expired leases.
    Tick,

    /// Shutdown the queue.
    Shutdown,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to reserve and process one job.
    Poll,
}
