use anyhow::Context;
use mq::Mq;
use tracing::{error, info};
use worker::{RetryPolicy, WorkerAppConfig, WorkerContext, run_worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!("Worker starting: {}", config.worker.id);

    let ctx = WorkerContext::from_config(&config)
        .await
        .context("Failed to initialize worker")?;
    let mq = Mq::connect(&config.mq)
        .await
        .context("Failed to initialize MQ")?;
    if mq.is_memory() {
        anyhow::bail!("the in-process queue only works inside the server; use the redis backend");
    }

    info!(
        queue_name = %config.mq.queue_name,
        concurrency = config.worker.concurrency,
        max_attempts = config.worker.max_attempts,
        "MQ connected"
    );

    let result = run_worker(
        ctx,
        &mq,
        &config.mq.queue_name,
        config.worker.concurrency,
        RetryPolicy::from(&config.worker),
    )
    .await;

    if let Err(e) = result {
        error!(error = %e, "Worker stopped unexpectedly");
    }

    Ok(())
}
