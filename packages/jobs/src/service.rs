//! The job service: pipeline lifecycle, routing and consumption.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::join_all;
use jobs_core::{Job, JobEvent, JobId, Stat};
use tokio::sync::{Mutex, mpsc, watch};

use crate::broker::{Broker, Consumer};
use crate::bus::EventBus;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, ServiceError, ServiceResult};
use crate::pipeline::{Pipeline, Pipelines};
use crate::pool::WorkerPool;

/// Service lifecycle.
///
/// State machine: Created -> Initialized -> Serving -> Stopped -> Destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Initialized,
    Serving,
    Stopped,
    Destroyed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Serving => "serving",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Destroyed => "destroyed",
        }
    }

    fn misuse(self, operation: &'static str) -> ServiceError {
        ServiceError::Lifecycle {
            operation,
            state: self.as_str(),
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything resolved by `init`. Read-only afterwards.
struct Runtime {
    pipelines: Pipelines,
    dispatcher: Dispatcher,
    consume: Vec<Arc<Pipeline>>,
}

/// Routes jobs to pipelines and supervises their consumption.
///
/// Share it behind an `Arc`: `serve` blocks its caller until `stop`, while
/// producers keep calling `push` from other tasks.
pub struct Service {
    brokers: HashMap<String, Arc<dyn Broker>>,
    pool: Arc<dyn WorkerPool>,
    bus: Arc<EventBus>,
    runtime: OnceLock<Runtime>,
    lifecycle: Mutex<Lifecycle>,
    destroyed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Service {
    /// Create a service that executes jobs on `pool`.
    pub fn new(pool: impl WorkerPool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            brokers: HashMap::new(),
            pool: Arc::new(pool),
            bus: Arc::new(EventBus::new()),
            runtime: OnceLock::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            destroyed: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Make `broker` available to pipelines under `name`.
    pub fn with_broker(mut self, name: impl Into<String>, broker: impl Broker) -> Self {
        self.brokers.insert(name.into(), Arc::new(broker));
        self
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> Lifecycle {
        *self.lifecycle.lock().await
    }

    /// Register an event listener. Allowed in any state.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.bus.add_listener(listener);
    }

    /// Event bus shared by this service.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Resolve brokers, build the pipeline registry, compile dispatch rules
    /// and register every pipeline with its broker.
    pub async fn init(&self, config: Config) -> ServiceResult<()> {
        let mut state = self.lifecycle.lock().await;
        if *state != Lifecycle::Created {
            return Err(state.misuse("init"));
        }

        let mut pipelines = Vec::with_capacity(config.pipelines.len());
        for (name, pipeline) in config.pipelines {
            if !self.brokers.contains_key(&pipeline.broker) {
                return Err(ConfigError::UnknownBroker {
                    pipeline: name,
                    broker: pipeline.broker,
                }
                .into());
            }
            pipelines.push(Pipeline::new(name, pipeline.broker, pipeline.options));
        }
        let pipelines = Pipelines::new(pipelines);

        let mut consume = Vec::with_capacity(config.consume.len());
        for name in config.consume {
            let Some(pipeline) = pipelines.get(&name) else {
                return Err(ConfigError::UnknownPipeline {
                    context: "consume".into(),
                    pipeline: name,
                }
                .into());
            };
            if !consume.iter().any(|p: &Arc<Pipeline>| p.name() == name) {
                consume.push(pipeline.clone());
            }
        }

        let dispatcher = Dispatcher::compile(
            config
                .dispatch
                .into_iter()
                .map(|(pattern, target)| (pattern, target.into_options())),
            pipelines.all().iter().map(|p| p.name().to_string()),
        )?;

        for pipeline in pipelines.all() {
            self.broker_for(&pipeline)?
                .register(&pipeline)
                .map_err(|source| ConfigError::Register {
                    pipeline: pipeline.name().to_string(),
                    source,
                })?;
        }

        tracing::info!(
            pipelines = pipelines.len(),
            rules = dispatcher.len(),
            consume = consume.len(),
            "Job service initialized"
        );

        // Guarded by the lifecycle lock, so this is the only set.
        let _ = self.runtime.set(Runtime {
            pipelines,
            dispatcher,
            consume,
        });
        *state = Lifecycle::Initialized;
        Ok(())
    }

    /// Read-only view of the pipeline registry.
    pub fn pipelines(&self) -> ServiceResult<&Pipelines> {
        Ok(&self.runtime("pipelines")?.pipelines)
    }

    /// Route `job` to its pipeline and enqueue it.
    pub async fn push(&self, mut job: Job) -> ServiceResult<JobId> {
        let runtime = self.runtime("push")?;
        let route = runtime.dispatcher.resolve(&job)?;
        if let Some(defaults) = &route.defaults {
            job.options.merge_defaults(defaults);
        }

        let pipeline = runtime
            .pipelines
            .get(&route.pipeline)
            .ok_or_else(|| ServiceError::UnknownPipeline(route.pipeline.clone()))?;
        let broker = self.broker_for(pipeline)?;

        let ticket = pipeline.added().begin();
        match broker.push(pipeline, job.clone()).await {
            Ok(id) => {
                self.bus.emit(JobEvent::JobAdded {
                    id: id.clone(),
                    pipeline: pipeline.name().to_string(),
                    job,
                    timestamp: Utc::now(),
                });
                ticket.announce(&id);
                Ok(id)
            }
            Err(source) => {
                drop(ticket);
                self.bus.emit(JobEvent::PushError {
                    pipeline: Some(pipeline.name().to_string()),
                    job,
                    error: source.to_string(),
                    timestamp: Utc::now(),
                });
                Err(ServiceError::Push {
                    pipeline: pipeline.name().to_string(),
                    source,
                })
            }
        }
    }

    /// Queue depth and consuming state of a pipeline.
    pub async fn stat(&self, pipeline: &str) -> ServiceResult<Stat> {
        let runtime = self.runtime("stat")?;
        let pipeline = runtime
            .pipelines
            .get(pipeline)
            .ok_or_else(|| ServiceError::UnknownPipeline(pipeline.to_string()))?;

        let depth = self
            .broker_for(pipeline)?
            .stat(pipeline)
            .await
            .map_err(|source| ServiceError::Broker {
                pipeline: pipeline.name().to_string(),
                source,
            })?;

        Ok(Stat::new(
            pipeline.name(),
            pipeline.broker(),
            depth,
            pipeline.is_consuming(),
        ))
    }

    /// Stats for every registered pipeline.
    pub async fn stats(&self) -> ServiceResult<Vec<Stat>> {
        let mut stats = Vec::new();
        for pipeline in self.pipelines()?.all() {
            stats.push(self.stat(pipeline.name()).await?);
        }
        Ok(stats)
    }

    /// Start consuming every pipeline in the consume set, then block until
    /// `stop` is called or a broker reports an unrecoverable error.
    pub async fn serve(&self) -> ServiceResult<()> {
        let mut fatal = {
            let mut state = self.lifecycle.lock().await;
            match *state {
                Lifecycle::Initialized => {}
                // stop won the race; nothing to serve
                Lifecycle::Stopped => return Ok(()),
                other => return Err(other.misuse("serve")),
            }
            let runtime = self.runtime("serve")?;
            *state = Lifecycle::Serving;

            let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

            for pipeline in &runtime.consume {
                let broker = self.broker_for(pipeline)?;
                let consumer = self.consumer(pipeline).with_fatal(fatal_tx.clone());

                if let Err(source) = broker.consume(pipeline, consumer).await {
                    tracing::error!(pipeline = %pipeline.name(), %source, "Failed to start consuming");
                    self.stop_consumers(runtime).await;
                    *state = Lifecycle::Stopped;
                    self.shutdown.send_replace(true);
                    return Err(ServiceError::Broker {
                        pipeline: pipeline.name().to_string(),
                        source,
                    });
                }

                pipeline.set_consuming(true);
                tracing::info!(pipeline = %pipeline.name(), broker = %pipeline.broker(), "Consuming pipeline");
                self.bus.emit(JobEvent::BrokerReady {
                    pipeline: pipeline.name().to_string(),
                    broker: pipeline.broker().to_string(),
                    timestamp: Utc::now(),
                });
            }

            fatal_rx
        };

        let mut shutdown = self.shutdown.subscribe();
        let stopped = async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        };
        tokio::select! {
            _ = stopped => Ok(()),
            Some((pipeline, source)) = fatal.recv() => {
                tracing::error!(%pipeline, %source, "Broker failed, stopping job service");
                self.stop().await?;
                Err(ServiceError::Broker { pipeline, source })
            }
        }
    }

    /// Stop consuming and release `serve`. Idempotent.
    ///
    /// Returns once every broker finished its in-flight jobs. Pushing is
    /// still allowed afterwards.
    pub async fn stop(&self) -> ServiceResult<()> {
        let mut state = self.lifecycle.lock().await;
        match *state {
            Lifecycle::Stopped | Lifecycle::Destroyed => return Ok(()),
            Lifecycle::Created => return Err(state.misuse("stop")),
            Lifecycle::Initialized => {}
            Lifecycle::Serving => {
                let runtime = self.runtime("stop")?;
                self.stop_consumers(runtime).await;
            }
        }

        *state = Lifecycle::Stopped;
        self.shutdown.send_replace(true);
        tracing::info!("Job service stopped");
        Ok(())
    }

    /// Stop if needed and run every broker's teardown hook. After this,
    /// `push` fails.
    pub async fn destroy(&self) -> ServiceResult<()> {
        if matches!(
            self.state().await,
            Lifecycle::Initialized | Lifecycle::Serving
        ) {
            self.stop().await?;
        }

        let mut state = self.lifecycle.lock().await;
        if *state == Lifecycle::Destroyed {
            return Ok(());
        }
        self.destroyed.store(true, Ordering::Release);

        for (name, broker) in &self.brokers {
            if let Err(error) = broker.shutdown().await {
                tracing::warn!(broker = %name, %error, "Broker shutdown failed");
            }
        }

        *state = Lifecycle::Destroyed;
        self.shutdown.send_replace(true);
        Ok(())
    }

    fn runtime(&self, operation: &'static str) -> ServiceResult<&Runtime> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(Lifecycle::Destroyed.misuse(operation));
        }
        self.runtime
            .get()
            .ok_or_else(|| Lifecycle::Created.misuse(operation))
    }

    fn broker_for(&self, pipeline: &Pipeline) -> ServiceResult<&Arc<dyn Broker>> {
        // binding was validated by init
        self.brokers.get(pipeline.broker()).ok_or_else(|| {
            ServiceError::Config(ConfigError::UnknownBroker {
                pipeline: pipeline.name().to_string(),
                broker: pipeline.broker().to_string(),
            })
        })
    }

    async fn stop_consumers(&self, runtime: &Runtime) {
        let stopping = runtime
            .consume
            .iter()
            .filter(|pipeline| pipeline.set_consuming(false))
            .filter_map(|pipeline| {
                let broker = self.brokers.get(pipeline.broker())?;
                Some(async move {
                    if let Err(error) = broker.stop_consuming(pipeline).await {
                        tracing::warn!(pipeline = %pipeline.name(), %error, "Failed to stop consuming");
                    }
                })
            })
            .collect::<Vec<_>>();

        join_all(stopping).await;
    }

    /// Build the per-pipeline handler: run the job on the worker pool,
    /// report the outcome, and hand the result back to the broker.
    fn consumer(&self, pipeline: &Arc<Pipeline>) -> Consumer {
        let name = pipeline.name().to_string();
        let pool = self.pool.clone();
        let bus = self.bus.clone();
        let gate = pipeline.clone();

        Consumer::new(name.clone(), move |id: JobId, job: Job| {
            let pool = pool.clone();
            let bus = bus.clone();
            let gate = gate.clone();
            let pipeline = name.clone();

            Box::pin(async move {
                let started = Instant::now();
                let result = match job.context(&id) {
                    Ok(context) => AssertUnwindSafe(pool.exec(context, job.body().to_vec()))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err("worker pool panicked".to_string())),
                    Err(e) => Err(format!("failed to encode job context: {}", e)),
                };

                let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                gate.added().wait_added(&id).await;
                let event = match &result {
                    Ok(()) => JobEvent::JobComplete {
                        id,
                        pipeline,
                        job,
                        duration_ms,
                        timestamp: Utc::now(),
                    },
                    Err(error) => JobEvent::JobError {
                        id,
                        pipeline,
                        job,
                        error: error.clone(),
                        timestamp: Utc::now(),
                    },
                };
                bus.emit(event);
                result
            })
        })
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("brokers", &self.brokers.keys().collect::<Vec<_>>())
            .field("initialized", &self.runtime.get().is_some())
            .finish_non_exhaustive()
    }
}
