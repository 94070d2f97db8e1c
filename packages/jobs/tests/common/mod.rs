#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobs::{
    Broker, BrokerError, BrokerFuture, BrokerStat, Config, Consumer, EphemeralBroker, ExecFuture,
    FnPool, Job, JobEvent, JobId, Pipeline, PipelineConfig, Service, WorkerPool,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Listener that keeps every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<JobEvent>>>,
}

impl Recorder {
    pub fn attach(service: &Service) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        service.add_listener(move |event| events.lock().unwrap().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&JobEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    /// Poll until an event matching `pred` shows up or `WAIT` elapses.
    pub async fn wait_for(&self, pred: impl Fn(&JobEvent) -> bool) -> Option<JobEvent> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Some(event) = self.events().into_iter().find(|e| pred(e)) {
                return Some(event);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Recorder {
    /// Poll until `n` events match `pred` or `WAIT` elapses.
    pub async fn wait_count(&self, pred: impl Fn(&JobEvent) -> bool, n: usize) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.count(&pred) < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

pub fn is_ready(event: &JobEvent) -> bool {
    matches!(event, JobEvent::BrokerReady { .. })
}

pub fn is_added(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobAdded { .. })
}

pub fn is_complete(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobComplete { .. })
}

pub fn is_error(event: &JobEvent) -> bool {
    matches!(event, JobEvent::JobError { .. })
}

/// Pool that succeeds on every job.
pub fn ok_pool() -> impl WorkerPool {
    FnPool::new(|_context: Vec<u8>, _body: Vec<u8>| -> ExecFuture { Box::pin(async { Ok(()) }) })
}

/// Pool that fails every job with `error`.
pub fn failing_pool(error: &'static str) -> impl WorkerPool {
    FnPool::new(move |_context: Vec<u8>, _body: Vec<u8>| -> ExecFuture {
        Box::pin(async move { Err(error.to_string()) })
    })
}

/// Pool that fails the first `failures` calls, then succeeds.
pub fn flaky_pool(failures: usize) -> impl WorkerPool {
    let calls = Arc::new(AtomicUsize::new(0));
    FnPool::new(move |_context: Vec<u8>, _body: Vec<u8>| -> ExecFuture {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if call < failures {
                Err(format!("attempt {} failed", call + 1))
            } else {
                Ok(())
            }
        })
    })
}

/// Pool that records every (context, body) pair it receives.
pub fn capturing_pool(seen: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>) -> impl WorkerPool {
    FnPool::new(move |context: Vec<u8>, body: Vec<u8>| -> ExecFuture {
        seen.lock().unwrap().push((context, body));
        Box::pin(async { Ok(()) })
    })
}

/// One ephemeral pipeline named `default`, with `app-*` routed to it.
pub fn default_config() -> Config {
    Config::default()
        .with_pipeline("default", PipelineConfig::new("ephemeral"))
        .with_rule("app-*", "default")
}

pub fn ephemeral_service(pool: impl WorkerPool) -> (Service, EphemeralBroker) {
    let broker = EphemeralBroker::new();
    let service = Service::new(pool).with_broker("ephemeral", broker.clone());
    (service, broker)
}

/// How a [`ScriptedBroker`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Accept everything.
    Accept,
    /// Reject every push.
    RejectPush,
    /// Refuse to start consuming.
    RefuseConsume,
    /// Start consuming, then report an unrecoverable failure.
    FailWhileConsuming,
    /// Take a while to accept each push.
    SlowPush,
    /// Hand each job to the consumer before `push` returns.
    DeliverOnPush,
}

/// How long a [`Script::SlowPush`] broker holds each push.
pub const SLOW_PUSH: Duration = Duration::from_secs(2);

/// In-test broker that counts its hook calls. Only `DeliverOnPush` ever
/// hands jobs to its consumer.
#[derive(Clone)]
pub struct ScriptedBroker {
    script: Script,
    consumer: Arc<Mutex<Option<Consumer>>>,
    pub registered: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
}

impl ScriptedBroker {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            consumer: Arc::new(Mutex::new(None)),
            registered: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Broker for ScriptedBroker {
    fn register(&self, _pipeline: &Pipeline) -> Result<(), BrokerError> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn push<'a>(&'a self, _pipeline: &'a Pipeline, job: Job) -> BrokerFuture<'a, JobId> {
        Box::pin(async move {
            match self.script {
                Script::RejectPush => Err(BrokerError::Rejected("queue is full".into())),
                Script::SlowPush => {
                    tokio::time::sleep(SLOW_PUSH).await;
                    Ok(JobId::generate())
                }
                Script::DeliverOnPush => {
                    let id = JobId::generate();
                    let consumer = self.consumer.lock().unwrap().clone();
                    if let Some(consumer) = consumer {
                        tokio::spawn(consumer.handle(id.clone(), job));
                    }
                    // let the delivery run ahead of the caller
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(id)
                }
                _ => Ok(JobId::generate()),
            }
        })
    }

    fn consume<'a>(&'a self, pipeline: &'a Pipeline, consumer: Consumer) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            match self.script {
                Script::RefuseConsume => Err(BrokerError::Unavailable("connection refused".into())),
                Script::FailWhileConsuming => {
                    let pipeline = pipeline.name().to_string();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        consumer.fail(BrokerError::Unavailable(format!("{} lost", pipeline)));
                    });
                    Ok(())
                }
                Script::DeliverOnPush => {
                    *self.consumer.lock().unwrap() = Some(consumer);
                    Ok(())
                }
                _ => Ok(()),
            }
        })
    }

    fn stop_consuming<'a>(&'a self, _pipeline: &'a Pipeline) -> BrokerFuture<'a, ()> {
        Box::pin(async move {
            self.consumer.lock().unwrap().take();
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn stat<'a>(&'a self, _pipeline: &'a Pipeline) -> BrokerFuture<'a, BrokerStat> {
        Box::pin(async { Ok(BrokerStat::default()) })
    }

    fn shutdown(&self) -> BrokerFuture<'_, ()> {
        Box::pin(async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// One pipeline named `default` bound to the scripted broker.
pub fn scripted_config() -> Config {
    Config::default()
        .with_pipeline("default", PipelineConfig::new("scripted"))
        .with_rule("*", "default")
        .with_consume("default")
}
