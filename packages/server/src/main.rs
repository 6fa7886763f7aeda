use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use common::notify::{BroadcastNotifier, Notifier};
use mq::Mq;
use tracing::{error, info};
use worker::{RetryPolicy, WorkerContext, run_worker};

use server::cleanup::run_cleanup;
use server::config::AppConfig;
use server::jobs::run_job_pruner;
use server::state::AppState;

const NOTIFY_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = AppConfig::load().context("Failed to load config")?;

    let notifier = Arc::new(BroadcastNotifier::new(NOTIFY_CAPACITY));
    let ctx = WorkerContext::from_config(&config.worker_app_config())
        .await
        .context("Failed to initialize storage and database")?
        .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>);
    let mq = Mq::connect(&config.mq)
        .await
        .context("Failed to initialize MQ")?;

    if mq.is_memory() {
        let worker_ctx = ctx.clone();
        let worker_mq = mq.clone();
        let queue = config.mq.queue_name.clone();
        let concurrency = config.worker.concurrency;
        let policy = RetryPolicy::from(&config.worker);
        info!(concurrency, "Running embedded worker");
        tokio::spawn(async move {
            if let Err(e) = run_worker(worker_ctx, &worker_mq, &queue, concurrency, policy).await {
                error!(error = %e, "Embedded worker stopped unexpectedly");
            }
        });
    }

    tokio::spawn(run_job_pruner(ctx.db.clone(), config.jobs.clone()));
    tokio::spawn(run_cleanup(
        config.cleanup.clone(),
        vec![
            PathBuf::from(&config.motion.upload_temp_dir),
            PathBuf::from(&config.motion.results_dir),
        ],
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        db: ctx.db.clone(),
        ctx,
        mq,
        notifier,
        config: Arc::new(config),
    };
    let app = server::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
