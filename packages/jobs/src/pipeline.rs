//! Pipelines and the registry that holds them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::gate::AddedGate;

/// A named binding of one broker plus its consuming state.
///
/// The broker binding is fixed at construction; only the consuming flag
/// changes while the service runs.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    broker: String,
    options: Map<String, Value>,
    consuming: AtomicBool,
    added: AddedGate,
}

impl Pipeline {
    /// Create a pipeline bound to `broker` with backend-specific options.
    pub fn new(
        name: impl Into<String>,
        broker: impl Into<String>,
        options: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            broker: broker.into(),
            options,
            consuming: AtomicBool::new(false),
            added: AddedGate::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the broker this pipeline is bound to.
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Whether the service is currently pulling jobs from this pipeline.
    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::Acquire)
    }

    pub(crate) fn set_consuming(&self, consuming: bool) -> bool {
        self.consuming.swap(consuming, Ordering::AcqRel)
    }

    pub(crate) fn added(&self) -> &AddedGate {
        &self.added
    }

    /// Raw pipeline options as configured.
    pub fn options(&self) -> &Map<String, Value> {
        &self.options
    }

    pub fn has(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// String option, or `default` when missing or not a string.
    pub fn string(&self, key: &str, default: &str) -> String {
        self.options
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Integer option; numeric strings are accepted.
    pub fn integer(&self, key: &str, default: i64) -> i64 {
        match self.options.get(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.options.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Duration option expressed in whole seconds.
    pub fn duration(&self, key: &str, default: Duration) -> Duration {
        match self.integer(key, -1) {
            n if n >= 0 => Duration::from_secs(n as u64),
            _ => default,
        }
    }
}

/// Lookup table of pipelines, built once during service initialization.
#[derive(Debug, Default, Clone)]
pub struct Pipelines {
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl Pipelines {
    pub(crate) fn new(pipelines: impl IntoIterator<Item = Pipeline>) -> Self {
        Self {
            pipelines: pipelines
                .into_iter()
                .map(|p| (p.name.clone(), Arc::new(p)))
                .collect(),
        }
    }

    /// Get a pipeline by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipelines.contains_key(name)
    }

    /// Snapshot of all pipelines, sorted by name.
    pub fn all(&self) -> Vec<Arc<Pipeline>> {
        let mut all: Vec<_> = self.pipelines.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Pipelines bound to the named broker.
    pub fn bound_to(&self, broker: &str) -> Vec<Arc<Pipeline>> {
        self.all()
            .into_iter()
            .filter(|p| p.broker == broker)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
