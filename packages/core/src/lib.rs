//! Core domain types for the job coordination engine.
//!
//! This crate contains value types shared by the service and brokers:
//! - Job, JobId and Options for units of work
//! - JobEvent for lifecycle reporting
//! - Stat and BrokerStat for pipeline depth

mod events;
mod job;
mod stat;

pub use events::JobEvent;
pub use job::{DEFAULT_TIMEOUT, Job, JobContext, JobId, Options};
pub use stat::{BrokerStat, Stat};
