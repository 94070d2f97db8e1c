//! Pipeline statistics.

use serde::{Deserialize, Serialize};

/// Point-in-time depth reported by a broker for one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerStat {
    /// Jobs ready for delivery.
    pub queue: i64,
    /// Jobs leased to a consumer and not yet acknowledged.
    pub active: i64,
    /// Jobs waiting for their delay or retry delay to elapse.
    pub delayed: i64,
}

/// Aggregate view of a pipeline, computed at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub pipeline: String,
    pub broker: String,
    pub queue: i64,
    pub active: i64,
    pub delayed: i64,
    /// Whether the service is pulling jobs from this pipeline.
    pub consuming: bool,
}

impl Stat {
    /// Combine broker depth with the pipeline's activation flag.
    pub fn new(
        pipeline: impl Into<String>,
        broker: impl Into<String>,
        depth: BrokerStat,
        consuming: bool,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            broker: broker.into(),
            queue: depth.queue,
            active: depth.active,
            delayed: depth.delayed,
            consuming,
        }
    }

    /// Jobs known to the broker in any state.
    pub fn total(&self) -> i64 {
        self.queue + self.active + self.delayed
    }
}
