//! `jobsd`: runs the job service with the ephemeral broker.
//!
//! Usage: `jobsd [config.json]` (defaults to `jobs.json`).

use std::error::Error;
use std::sync::Arc;

use jobs::{Config, EphemeralBroker, EventLogger, ExecFuture, FnPool, JobContext, Service};

const DEFAULT_CONFIG: &str = "jobs.json";

/// Demo pool: logs each job and succeeds.
fn log_pool() -> FnPool<impl Fn(Vec<u8>, Vec<u8>) -> ExecFuture + Send + Sync + 'static> {
    FnPool::new(|context: Vec<u8>, body: Vec<u8>| -> ExecFuture {
        Box::pin(async move {
            let context: JobContext = serde_json::from_slice(&context)
                .map_err(|e| format!("invalid job context: {}", e))?;
            tracing::info!(
                id = %context.id,
                job = %context.job,
                payload = %String::from_utf8_lossy(&body),
                "Executing job"
            );
            Ok(())
        })
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    tracing::info!("Starting jobsd with {}", path);
    let config = Config::load(&path).await?;

    let service = Arc::new(
        Service::new(log_pool()).with_broker("ephemeral", EphemeralBroker::new()),
    );
    EventLogger::attach(service.bus());
    service.init(config).await?;

    let mut serving = {
        let service = service.clone();
        tokio::spawn(async move { service.serve().await })
    };

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            true
        }
        result = &mut serving => {
            // serve only returns early on a broker failure
            if let Err(e) = result? {
                tracing::error!("Job service failed: {}", e);
            }
            false
        }
    };

    if interrupted {
        tracing::info!("Shutdown requested");
        service.stop().await?;
        serving.await??;
    }

    service.destroy().await?;
    tracing::info!("jobsd stopped");
    Ok(())
}
