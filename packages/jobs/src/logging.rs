//! Event listener that renders lifecycle events as tracing records.

use jobs_core::JobEvent;

use crate::bus::EventBus;

/// Logs every event: additions and completions at INFO, failures at
/// ERROR, broker readiness at DEBUG.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogger;

impl EventLogger {
    /// Attach a logger to `bus`.
    pub fn attach(bus: &EventBus) {
        let logger = EventLogger;
        bus.add_listener(move |event| logger.log(event));
    }

    pub fn log(&self, event: &JobEvent) {
        match event {
            JobEvent::BrokerReady {
                pipeline, broker, ..
            } => tracing::debug!(%pipeline, %broker, "jobs.ready"),
            JobEvent::JobAdded {
                id, pipeline, job, ..
            } => tracing::info!(job = %job.name, %id, %pipeline, "jobs.added"),
            JobEvent::JobComplete {
                id,
                pipeline,
                job,
                duration_ms,
                ..
            } => tracing::info!(job = %job.name, %id, %pipeline, duration_ms, "jobs.complete"),
            JobEvent::PushError {
                pipeline,
                job,
                error,
                ..
            } => tracing::error!(
                job = %job.name,
                pipeline = pipeline.as_deref().unwrap_or("-"),
                %error,
                "jobs.push_error"
            ),
            JobEvent::JobError {
                id,
                pipeline,
                job,
                error,
                ..
            } => tracing::error!(job = %job.name, %id, %pipeline, %error, "jobs.error"),
        }
    }
}
