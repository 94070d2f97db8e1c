//! Broker contract implemented by every queue backend.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use jobs_core::{BrokerStat, Job, JobId};
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::pipeline::Pipeline;

/// Future returned by broker operations.
pub type BrokerFuture<'a, T> = BoxFuture<'a, Result<T, BrokerError>>;

/// Future returned by a consumer handler. `Err` carries the failure detail.
pub type HandlerFuture = BoxFuture<'static, Result<(), String>>;

type HandlerFn = dyn Fn(JobId, Job) -> HandlerFuture + Send + Sync;

/// Callback installed by the service for one consumed pipeline.
///
/// Brokers call [`Consumer::handle`] once per delivered job. `Ok` means the
/// job must be acknowledged; `Err` means the attempt failed and the broker
/// applies the job's retry policy.
#[derive(Clone)]
pub struct Consumer {
    pipeline: String,
    handler: Arc<HandlerFn>,
    fatal: Option<mpsc::UnboundedSender<(String, BrokerError)>>,
}

impl Consumer {
    /// Create a consumer without a fatal error channel.
    pub fn new<F>(pipeline: impl Into<String>, handler: F) -> Self
    where
        F: Fn(JobId, Job) -> HandlerFuture + Send + Sync + 'static,
    {
        Self {
            pipeline: pipeline.into(),
            handler: Arc::new(handler),
            fatal: None,
        }
    }

    /// Route unrecoverable broker failures to `fatal`.
    pub fn with_fatal(mut self, fatal: mpsc::UnboundedSender<(String, BrokerError)>) -> Self {
        self.fatal = Some(fatal);
        self
    }

    /// Pipeline this consumer was installed for.
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Run the handler for one delivered job.
    pub fn handle(&self, id: JobId, job: Job) -> HandlerFuture {
        (self.handler)(id, job)
    }

    /// Report a failure the broker cannot recover from. Releases `serve`.
    pub fn fail(&self, error: BrokerError) {
        match &self.fatal {
            Some(tx) => {
                if tx.send((self.pipeline.clone(), error)).is_err() {
                    tracing::warn!(pipeline = %self.pipeline, "fatal broker error after service stopped");
                }
            }
            None => tracing::error!(pipeline = %self.pipeline, %error, "unrecoverable broker error"),
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

/// Pluggable queue backend.
///
/// A broker instance is shared by every pipeline bound to it and must be
/// safe under concurrent push, consume and stat calls. Visibility leases,
/// attempt tracking, retry delays and dead-lettering are the broker's job;
/// it consults [`jobs_core::Options::can_retry`],
/// [`jobs_core::Options::retry_duration`] and
/// [`jobs_core::Options::timeout_duration`] to do so.
pub trait Broker: Send + Sync + 'static {
    /// Initialization hook, called once per bound pipeline before serving.
    fn register(&self, pipeline: &Pipeline) -> Result<(), BrokerError>;

    /// Enqueue a job, honoring its delay.
    fn push<'a>(&'a self, pipeline: &'a Pipeline, job: Job) -> BrokerFuture<'a, JobId>;

    /// Start delivering jobs of `pipeline` to `consumer`.
    fn consume<'a>(&'a self, pipeline: &'a Pipeline, consumer: Consumer) -> BrokerFuture<'a, ()>;

    /// Stop pulling jobs for `pipeline`. Jobs already handed to the consumer
    /// run to completion before this resolves.
    fn stop_consuming<'a>(&'a self, pipeline: &'a Pipeline) -> BrokerFuture<'a, ()>;

    /// Point-in-time depth. Must not wait on in-flight jobs.
    fn stat<'a>(&'a self, pipeline: &'a Pipeline) -> BrokerFuture<'a, BrokerStat>;

    /// Teardown hook, called once when the service is destroyed.
    fn shutdown(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
