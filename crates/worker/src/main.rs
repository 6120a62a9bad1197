use std::sync::Arc;
use std::time::Duration;

use mediagen_jobs::{JobLifecycle, LifecycleConfig, PollBackoff, TokioScheduler};
use mediagen_targets::{AdapterRegistry, TargetApiConfig};
use mediagen_worker::PollSweeper;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagen_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = mediagen_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    mediagen_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let api_key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set");
    let base_url = std::env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into());
    let job_ttl_secs: u64 = std::env::var("JOB_TTL_SECS")
        .unwrap_or_else(|_| "600".into())
        .parse()
        .expect("JOB_TTL_SECS must be a valid u64");

    let store = Arc::new(mediagen_db::PgJobStore::new(pool.clone()));
    let (scheduler, mut poll_rx) = TokioScheduler::channel();
    let adapters = Arc::new(AdapterRegistry::builtin(&TargetApiConfig {
        base_url,
        api_key,
        veo_model: std::env::var("VEO_MODEL").unwrap_or_else(|_| "veo-3.0-generate-001".into()),
        imagen_model: std::env::var("IMAGEN_MODEL")
            .unwrap_or_else(|_| "imagen-4.0-generate-001".into()),
        lyria_model: std::env::var("LYRIA_MODEL").unwrap_or_else(|_| "lyria-002".into()),
    }));
    let lifecycle = Arc::new(JobLifecycle::new(
        store,
        Arc::new(scheduler),
        adapters,
        LifecycleConfig {
            ttl: Duration::from_secs(job_ttl_secs),
            backoff: PollBackoff::default(),
        },
    ));

    let cancel = CancellationToken::new();

    // Armed callbacks give low-latency polls; the sweeper re-delivers
    // any that were lost to a restart.
    let callback_cancel = cancel.clone();
    let callback_lifecycle = lifecycle.clone();
    let callbacks = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = callback_cancel.cancelled() => break,
                Some(request) = poll_rx.recv() => {
                    if let Err(e) = callback_lifecycle.poll(request.job_id).await {
                        tracing::error!(job_id = %request.job_id, error = %e, "Poll cycle errored");
                    }
                }
            }
        }
    });

    let sweeper = PollSweeper::new(pool, lifecycle);
    let sweep_cancel = cancel.clone();
    let sweep = tokio::spawn(async move { sweeper.run(sweep_cancel).await });

    tracing::info!("Worker started");
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Worker shutting down");
    cancel.cancel();
    let _ = tokio::join!(callbacks, sweep);
}
