//! Queue actor holding one pipeline's jobs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use jobs_core::{BrokerStat, Job, JobId};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::time::Instant;

use super::messages::{DeadLetter, Delivery, QueueMessage};

/// How often leases are checked for expiry.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Stand-in for "never" when a delay or lease would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Default number of dead letters kept per pipeline.
pub const DEFAULT_DEAD_LIMIT: usize = 1000;

fn after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[derive(Debug, Clone)]
struct Entry {
    id: JobId,
    job: Job,
    attempts: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct Lease {
    entry: Entry,
    deadline: Instant,
}

/// Arguments for the queue actor.
pub struct QueueArgs {
    pub pipeline: String,
    /// Maximum number of waiting jobs; `None` is unbounded.
    pub size: Option<usize>,
    /// Dead letters kept; older ones are dropped first.
    pub dead_limit: usize,
}

/// State for the queue actor.
pub struct QueueActorState {
    pipeline: String,
    size: Option<usize>,
    dead_limit: usize,
    /// Waiting jobs in push order, including delayed ones.
    pending: VecDeque<Entry>,
    /// Jobs leased to workers.
    leased: HashMap<JobId, Lease>,
    dead: VecDeque<DeadLetter>,
}

impl QueueActorState {
    pub fn new(args: QueueArgs) -> Self {
        Self {
            pipeline: args.pipeline,
            size: args.size,
            dead_limit: args.dead_limit,
            pending: VecDeque::new(),
            leased: HashMap::new(),
            dead: VecDeque::new(),
        }
    }

    fn push(&mut self, job: Job, now: Instant) -> Result<JobId, String> {
        if let Some(size) = self.size
            && self.pending.len() >= size
        {
            return Err("queue is full".into());
        }

        let id = JobId::generate();
        let visible_at = after(now, job.options.delay_duration());
        self.pending.push_back(Entry {
            id: id.clone(),
            job,
            attempts: 0,
            visible_at,
        });
        Ok(id)
    }

    fn reserve(&mut self, now: Instant) -> Option<Delivery> {
        let index = self.pending.iter().position(|e| e.visible_at <= now)?;
        let mut entry = self.pending.remove(index)?;
        entry.attempts += 1;

        let delivery = Delivery {
            id: entry.id.clone(),
            job: entry.job.clone(),
            attempt: entry.attempts,
        };
        let deadline = after(now, entry.job.options.timeout_duration());
        self.leased
            .insert(entry.id.clone(), Lease { entry, deadline });
        Some(delivery)
    }

    /// Remove the lease for `id` if `attempt` still owns it.
    fn release(&mut self, id: &JobId, attempt: u32) -> Option<Entry> {
        match self.leased.get(id) {
            Some(lease) if lease.entry.attempts == attempt => {
                self.leased.remove(id).map(|lease| lease.entry)
            }
            _ => {
                tracing::debug!(pipeline = %self.pipeline, %id, attempt, "Ignoring stale lease");
                None
            }
        }
    }

    fn fail(&mut self, mut entry: Entry, error: String, now: Instant) {
        if entry.job.options.can_retry(entry.attempts) {
            tracing::debug!(
                pipeline = %self.pipeline,
                id = %entry.id,
                attempts = entry.attempts,
                "Retrying job"
            );
            entry.visible_at = after(now, entry.job.options.retry_duration());
            self.pending.push_back(entry);
        } else {
            tracing::warn!(
                pipeline = %self.pipeline,
                id = %entry.id,
                attempts = entry.attempts,
                %error,
                "Job dead-lettered"
            );
            if self.dead_limit == 0 {
                return;
            }
            if self.dead.len() >= self.dead_limit {
                self.dead.pop_front();
            }
            self.dead.push_back(DeadLetter {
                id: entry.id,
                job: entry.job,
                attempts: entry.attempts,
                error,
            });
        }
    }

    fn sweep(&mut self, now: Instant) {
        let expired: Vec<JobId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                self.fail(lease.entry, "lease expired".into(), now);
            }
        }
    }

    fn stat(&self, now: Instant) -> BrokerStat {
        let delayed = self.pending.iter().filter(|e| e.visible_at > now).count();
        BrokerStat {
            queue: (self.pending.len() - delayed) as i64,
            active: self.leased.len() as i64,
            delayed: delayed as i64,
        }
    }
}

/// Queue actor that owns a single pipeline's jobs.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.pipeline);

        // Start periodic lease sweep
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                if myself.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(QueueActorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let now = Instant::now();
        match message {
            QueueMessage::Push { job, reply } => {
                let _ = reply.send(state.push(*job, now));
            }

            QueueMessage::Reserve { reply } => {
                let _ = reply.send(state.reserve(now));
            }

            QueueMessage::Ack { id, attempt } => {
                state.release(&id, attempt);
            }

            QueueMessage::Nack { id, attempt, error } => {
                if let Some(entry) = state.release(&id, attempt) {
                    state.fail(entry, error, now);
                }
            }

            QueueMessage::Stat { reply } => {
                let _ = reply.send(state.stat(now));
            }

            QueueMessage::DeadLetters { reply } => {
                let _ = reply.send(state.dead.iter().cloned().collect());
            }

            QueueMessage::Tick => state.sweep(now),

            QueueMessage::Shutdown => {
                tracing::info!("Shutting down queue: {}", state.pipeline);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
