//! Job domain types for units of work submitted to pipelines.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Reserve window applied when a job does not specify a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Identifier assigned to a job by the broker that accepted it.
///
/// Backends are free to use their own identifier format (message ids,
/// delivery tags); locally generated ids are ULIDs so they sort by creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a new unique job ID.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-job execution policy. Every field is optional; zero means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Explicit pipeline, bypassing dispatch rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    /// Seconds before the job becomes visible to consumers.
    #[serde(skip_serializing_if = "is_zero")]
    pub delay: u64,
    /// Maximum number of deliveries before the job is dead-lettered.
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_attempts: u32,
    /// Seconds to wait before a failed job is delivered again.
    #[serde(skip_serializing_if = "is_zero")]
    pub retry_delay: u64,
    /// Seconds a broker waits for an ack before redelivering.
    #[serde(skip_serializing_if = "is_zero")]
    pub timeout: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl Options {
    /// Whether a job that has been attempted `attempts` times may run again.
    pub fn can_retry(&self, attempts: u32) -> bool {
        self.max_attempts > attempts
    }

    pub fn delay_duration(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    pub fn retry_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Lease window; falls back to [`DEFAULT_TIMEOUT`] when unset.
    pub fn timeout_duration(&self) -> Duration {
        if self.timeout == 0 {
            return DEFAULT_TIMEOUT;
        }
        Duration::from_secs(self.timeout)
    }

    /// Fill every unset field from `defaults`. Values already present win.
    pub fn merge_defaults(&mut self, defaults: &Options) {
        if self.pipeline.is_none() {
            self.pipeline = defaults.pipeline.clone();
        }
        if self.delay == 0 {
            self.delay = defaults.delay;
        }
        if self.max_attempts == 0 {
            self.max_attempts = defaults.max_attempts;
        }
        if self.retry_delay == 0 {
            self.retry_delay = defaults.retry_delay;
        }
        if self.timeout == 0 {
            self.timeout = defaults.timeout;
        }
    }

    /// Set the explicit pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    /// Set the delay in seconds.
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self
    }

    /// Set the retry budget and the pause between retries.
    pub fn with_retries(mut self, max_attempts: u32, retry_delay: u64) -> Self {
        self.max_attempts = max_attempts;
        self.retry_delay = retry_delay;
        self
    }

    /// Set the reserve window in seconds.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Identity envelope handed to a worker next to the raw payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobContext {
    pub id: String,
    pub job: String,
}

/// A job represents a unit of work routed to a pipeline.
///
/// `name` and `payload` are never rewritten once the job is pushed; only
/// `options` drives execution policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job type, used for routing and reported to the worker.
    #[serde(rename = "job")]
    pub name: String,
    /// Application-defined payload, passed to the worker verbatim.
    pub payload: String,
    /// Execution policy.
    #[serde(default, skip_serializing_if = "is_default_options")]
    pub options: Options,
}

fn is_default_options(options: &Options) -> bool {
    *options == Options::default()
}

impl Job {
    /// Create a job with default options.
    pub fn new(name: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            options: Options::default(),
        }
    }

    /// Replace the options for this job.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Raw payload bytes for the worker.
    pub fn body(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    /// JSON envelope `{"id": .., "job": ..}` sent alongside the body.
    pub fn context(&self, id: &JobId) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&JobContext {
            id: id.to_string(),
            job: self.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_retry_is_strictly_below_max_attempts() {
        let options = Options::default().with_retries(3, 0);
        assert!(options.can_retry(0));
        assert!(options.can_retry(2));
        assert!(!options.can_retry(3));
        assert!(!options.can_retry(10));

        let none = Options::default();
        assert!((0..5).all(|a| !none.can_retry(a)));
    }

    #[test]
    fn timeout_defaults_to_thirty_minutes() {
        assert_eq!(Options::default().timeout_duration(), Duration::from_secs(1800));
        assert_eq!(
            Options::default().with_timeout(7).timeout_duration(),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn delay_and_retry_are_in_seconds() {
        let options = Options::default().with_delay(4).with_retries(1, 5);
        assert_eq!(options.delay_duration(), Duration::from_secs(4));
        assert_eq!(options.retry_duration(), Duration::from_secs(5));
    }

    #[test]
    fn merge_keeps_explicit_values() {
        let mut options = Options::default().with_delay(2);
        let defaults = Options::default()
            .with_pipeline("mail")
            .with_delay(60)
            .with_retries(3, 10);
        options.merge_defaults(&defaults);

        assert_eq!(options.pipeline.as_deref(), Some("mail"));
        assert_eq!(options.delay, 2);
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.retry_delay, 10);
        assert_eq!(options.timeout, 0);
    }

    #[test]
    fn wire_shape_uses_job_key_and_camel_case() -> Result<(), serde_json::Error> {
        let job: Job = serde_json::from_str(
            r#"{"job":"app-send-mail","payload":"{}","options":{"maxAttempts":2,"retryDelay":5}}"#,
        )?;
        assert_eq!(job.name, "app-send-mail");
        assert_eq!(job.options.max_attempts, 2);
        assert_eq!(job.options.retry_delay, 5);

        let bare: Job = serde_json::from_str(r#"{"job":"x","payload":""}"#)?;
        assert_eq!(bare.options, Options::default());
        Ok(())
    }

    #[test]
    fn context_and_body_are_separate() -> Result<(), serde_json::Error> {
        let job = Job::new("app-send-mail", "{\"to\":\"a@b\"}");
        let id = JobId::from("01J0000000000000000000000");

        let ctx: JobContext = serde_json::from_slice(&job.context(&id)?)?;
        assert_eq!(ctx.id, id.as_str());
        assert_eq!(ctx.job, "app-send-mail");
        assert_eq!(job.body(), b"{\"to\":\"a@b\"}");
        Ok(())
    }
}
