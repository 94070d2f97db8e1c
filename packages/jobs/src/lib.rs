//! Broker-agnostic job coordination.
//!
//! Jobs are routed to named pipelines by glob dispatch rules, enqueued on
//! the broker each pipeline is bound to, and executed on a [`WorkerPool`]
//! while the pipeline is consumed. Every step is reported on an
//! [`EventBus`].
//!
//! # Architecture
//!
//! - `Service` - Owns the lifecycle, routes pushes and supervises consumers
//! - `Dispatcher` - Compiled glob rules mapping job names to pipelines
//! - `Broker` - Pluggable queue backend; `EphemeralBroker` ships in-process
//! - `EventBus` - Synchronous fan-out of `JobEvent`s to listeners
//!
//! # Usage
//!
//! ```ignore
//! use jobs::{Config, EphemeralBroker, FnPool, Service};
//!
//! let service = Service::new(FnPool::new(|_ctx, _body| Box::pin(async { Ok(()) })))
//!     .with_broker("ephemeral", EphemeralBroker::new());
//! service.init(Config::load("jobs.json").await?).await?;
//! service.push(Job::new("app-signup", "{}")).await?;
//! ```

mod broker;
mod bus;
mod config;
mod dispatcher;
mod error;
mod gate;
mod logging;
mod pipeline;
mod pool;
mod service;

pub mod ephemeral;

pub use broker::{Broker, BrokerFuture, Consumer, HandlerFuture};
pub use bus::{EventBus, Listener};
pub use config::{Config, DispatchTarget, PipelineConfig};
pub use dispatcher::{Dispatcher, Route};
pub use ephemeral::{DeadLetter, EphemeralBroker};
pub use error::{BrokerError, ConfigError, RoutingError, ServiceError, ServiceResult};
pub use logging::EventLogger;
pub use pipeline::{Pipeline, Pipelines};
pub use pool::{ExecFuture, ExecResult, FnPool, WorkerPool};
pub use service::{Lifecycle, Service};

/// Re-export core types for convenience.
pub use jobs_core::{BrokerStat, DEFAULT_TIMEOUT, Job, JobContext, JobEvent, JobId, Options, Stat};
