use std::net::SocketAddr;
use std::sync::Arc;

use mediagen_api::config::ServerConfig;
use mediagen_api::state::AppState;
use mediagen_compiler::{gemini::GeminiClient, PromptCompiler};
use mediagen_core::schema::SchemaRegistry;
use mediagen_jobs::{JobLifecycle, LifecycleConfig, PollBackoff, TokioScheduler};
use mediagen_targets::{AdapterRegistry, TargetApiConfig};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagen_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = mediagen_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    mediagen_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    let store = Arc::new(mediagen_db::PgJobStore::new(pool));
    let (scheduler, mut poll_rx) = TokioScheduler::channel();
    let adapters = Arc::new(AdapterRegistry::builtin(&TargetApiConfig {
        base_url: config.targets.base_url.clone(),
        api_key: config.targets.api_key.clone(),
        veo_model: config.targets.veo_model.clone(),
        imagen_model: config.targets.imagen_model.clone(),
        lyria_model: config.targets.lyria_model.clone(),
    }));
    let lifecycle = Arc::new(JobLifecycle::new(
        store,
        Arc::new(scheduler),
        adapters,
        LifecycleConfig {
            ttl: std::time::Duration::from_secs(config.job_ttl_secs),
            backoff: PollBackoff::default(),
        },
    ));

    let compiler = PromptCompiler::new(
        GeminiClient::new(
            config.reasoning.base_url.clone(),
            config.reasoning.model.clone(),
            config.reasoning.api_key.clone(),
        ),
        SchemaRegistry::builtin(),
    );

    let state = AppState {
        lifecycle: lifecycle.clone(),
        compiler: Arc::new(compiler),
        schemas: Arc::new(SchemaRegistry::builtin()),
    };

    // Consume armed poll callbacks in-process.
    let cancel = CancellationToken::new();
    let poll_cancel = cancel.clone();
    let poll_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = poll_cancel.cancelled() => break,
                Some(request) = poll_rx.recv() => {
                    if let Err(e) = poll_lifecycle.poll(request.job_id).await {
                        tracing::error!(job_id = %request.job_id, error = %e, "Poll cycle errored");
                    }
                }
            }
        }
    });

    let cors_origins: Vec<axum::http::HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let app = mediagen_api::app(state).layer(
        CorsLayer::new()
            .allow_origin(cors_origins)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST"),
        config.port,
    );
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        })
        .await
        .unwrap();
}
