//! Lifecycle events reported to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events emitted by the job service.
///
/// Errors are carried as rendered strings so events stay cloneable and
/// serializable regardless of the backend error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A pipeline's broker started consuming.
    BrokerReady {
        pipeline: String,
        broker: String,
        timestamp: DateTime<Utc>,
    },
    /// A job was accepted by its broker.
    JobAdded {
        id: JobId,
        pipeline: String,
        job: Job,
        timestamp: DateTime<Utc>,
    },
    /// A job was processed successfully.
    JobComplete {
        id: JobId,
        pipeline: String,
        job: Job,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job could not be enqueued.
    PushError {
        pipeline: Option<String>,
        job: Job,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A delivery attempt failed. The broker decides whether it is retried.
    JobError {
        id: JobId,
        pipeline: String,
        job: Job,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::BrokerReady { timestamp, .. } => *timestamp,
            JobEvent::JobAdded { timestamp, .. } => *timestamp,
            JobEvent::JobComplete { timestamp, .. } => *timestamp,
            JobEvent::PushError { timestamp, .. } => *timestamp,
            JobEvent::JobError { timestamp, .. } => *timestamp,
        }
    }

    /// Get the pipeline associated with this event, if known.
    pub fn pipeline(&self) -> Option<&str> {
        match self {
            JobEvent::BrokerReady { pipeline, .. } => Some(pipeline),
            JobEvent::JobAdded { pipeline, .. } => Some(pipeline),
            JobEvent::JobComplete { pipeline, .. } => Some(pipeline),
            JobEvent::PushError { pipeline, .. } => pipeline.as_deref(),
            JobEvent::JobError { pipeline, .. } => Some(pipeline),
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            JobEvent::JobAdded { id, .. } => Some(id),
            JobEvent::JobComplete { id, .. } => Some(id),
            JobEvent::JobError { id, .. } => Some(id),
            JobEvent::BrokerReady { .. } | JobEvent::PushError { .. } => None,
        }
    }

    /// Get the job this event is about, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            JobEvent::JobAdded { job, .. } => Some(job),
            JobEvent::JobComplete { job, .. } => Some(job),
            JobEvent::PushError { job, .. } => Some(job),
            JobEvent::JobError { job, .. } => Some(job),
            JobEvent::BrokerReady { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::BrokerReady {
                pipeline, broker, ..
            } => format!("Pipeline {} ready on {}", pipeline, broker),
            JobEvent::JobAdded { id, job, .. } => format!("Job {} {} added", job.name, id),
            JobEvent::JobComplete {
                id,
                job,
                duration_ms,
                ..
            } => format!("Job {} {} completed in {}ms", job.name, id, duration_ms),
            JobEvent::PushError { job, error, .. } => {
                format!("Job {} push failed: {}", job.name, error)
            }
            JobEvent::JobError { id, job, error, .. } => {
                format!("Job {} {} failed: {}", job.name, id, error)
            }
        }
    }
}
