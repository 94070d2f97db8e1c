//! Service configuration.
//!
//! ```json
//! {
//!   "pipelines": { "default": { "broker": "ephemeral", "concurrency": 2 } },
//!   "dispatch":  { "app-*": "default", "mail-*": { "pipeline": "default", "maxAttempts": 3 } },
//!   "consume":   ["default"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use jobs_core::Options;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::ConfigError;

/// Definition of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the broker the pipeline is bound to.
    pub broker: String,
    /// Backend-specific options.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl PipelineConfig {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            options: Map::new(),
        }
    }

    /// Add a backend-specific option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Target of a dispatch rule: a pipeline name, or default options that
/// include the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DispatchTarget {
    Pipeline(String),
    Options(Options),
}

impl DispatchTarget {
    /// Normalize into option defaults carrying the target pipeline.
    pub fn into_options(self) -> Options {
        match self {
            DispatchTarget::Pipeline(pipeline) => Options::default().with_pipeline(pipeline),
            DispatchTarget::Options(options) => options,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipelines: BTreeMap<String, PipelineConfig>,
    pub dispatch: BTreeMap<String, DispatchTarget>,
    /// Pipelines to consume on serve.
    pub consume: Vec<String>,
}

impl Config {
    /// Parse configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_json(&json)?;
        tracing::debug!("Loaded jobs config from {:?}", path);
        Ok(config)
    }

    /// Add a pipeline.
    pub fn with_pipeline(mut self, name: impl Into<String>, pipeline: PipelineConfig) -> Self {
        self.pipelines.insert(name.into(), pipeline);
        self
    }

    /// Add a dispatch rule routing `pattern` to `pipeline`.
    pub fn with_rule(mut self, pattern: impl Into<String>, pipeline: impl Into<String>) -> Self {
        self.dispatch
            .insert(pattern.into(), DispatchTarget::Pipeline(pipeline.into()));
        self
    }

    /// Mark a pipeline for consumption.
    pub fn with_consume(mut self, pipeline: impl Into<String>) -> Self {
        self.consume.push(pipeline.into());
        self
    }
}
