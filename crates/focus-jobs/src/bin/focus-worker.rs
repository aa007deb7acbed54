//! focus-worker: hosts the job worker pool and the maintenance scheduler.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use focus_db::{Database, PoolConfig};
use focus_inference::{
    ModelClassifier, ModelExtractor, OllamaBackend, OpenAIBackend, PatternExtractor,
    TieredClassifier,
};
use focus_jobs::{
    EntityMergeHandler, FocusConfig, LeaseReclaimHandler, MaintenanceScheduler,
    ProcessInteractionHandler, Resolver, SprintExpiryHandler, StageRouter, WorkerBuilder,
    WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "focus_jobs=info,focus_db=info,focus_inference=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("focus-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = FocusConfig::from_env();
    config.validate()?;
    let worker_config = WorkerConfig::from_env().with_focus_config(&config);

    info!("Connecting to database...");
    let db = Database::connect_with_config(
        &config.database_url,
        PoolConfig::from_env().with_worker_headroom(worker_config.max_concurrent_jobs),
    )
    .await?;
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database ready");

    let classifier = TieredClassifier::new(ModelClassifier::new(Arc::new(
        OllamaBackend::from_env(),
    )));
    let extractor = ModelExtractor::new(Arc::new(OpenAIBackend::from_env()?));

    let archive = Arc::new(db.archive.clone());
    let entities = Arc::new(db.entities.clone());
    let jobs = Arc::new(db.jobs.clone());

    let router = StageRouter::new(
        archive,
        entities.clone(),
        Arc::new(classifier),
        Arc::new(extractor),
        Arc::new(PatternExtractor::new()),
    )
    .with_resolver(Resolver::new(config.thresholds))
    .with_extraction_version(config.extraction_version);

    let worker = WorkerBuilder::new(jobs.clone())
        .with_config(worker_config.clone())
        .with_notify(db.jobs.job_notify())
        .with_handler(ProcessInteractionHandler::new(Arc::new(router)))
        .with_handler(SprintExpiryHandler::new(Arc::new(db.sprints.clone())))
        .with_handler(LeaseReclaimHandler::new(jobs.clone(), worker_config.backoff))
        .with_handler(EntityMergeHandler::new(entities))
        .build()
        .await;

    let worker = worker.start();
    let scheduler = MaintenanceScheduler::new(jobs)
        .with_focus_config(&config)
        .start();

    info!(
        max_concurrent = worker_config.max_concurrent_jobs,
        extraction_version = config.extraction_version,
        "focus-worker running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    scheduler.shutdown().await?;
    worker.shutdown().await?;
    info!("focus-worker stopped");
    Ok(())
}
