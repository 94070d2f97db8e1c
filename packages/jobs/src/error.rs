//! Error types for routing, brokers, configuration and the service.

use std::path::PathBuf;

/// A job could not be matched to a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("no dispatch rule matches job '{job}'")]
    NoMatch { job: String },

    #[error("job '{job}' targets undefined pipeline '{pipeline}'")]
    UnknownPipeline { job: String, pipeline: String },
}

/// Failure reported by a broker backend.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("pipeline '{0}' is not registered with this broker")]
    UnknownPipeline(String),

    #[error("pipeline '{0}' is already being consumed")]
    AlreadyConsuming(String),

    #[error("pipeline '{0}' is not being consumed")]
    NotConsuming(String),

    #[error("job rejected: {0}")]
    Rejected(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("invalid option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },
}

/// Invalid configuration, detected before the service can serve.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("pipeline '{pipeline}' references undefined broker '{broker}'")]
    UnknownBroker { pipeline: String, broker: String },

    #[error("{context} references undefined pipeline '{pipeline}'")]
    UnknownPipeline { context: String, pipeline: String },

    #[error("invalid dispatch pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pipeline '{pipeline}' could not be registered: {source}")]
    Register {
        pipeline: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by [`crate::Service`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("push to pipeline '{pipeline}' failed: {source}")]
    Push {
        pipeline: String,
        #[source]
        source: BrokerError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot {operation} while service is {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },

    #[error("undefined pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("broker error on pipeline '{pipeline}': {source}")]
    Broker {
        pipeline: String,
        #[source]
        source: BrokerError,
    },
}

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;
