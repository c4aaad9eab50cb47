//! Booru server binary.
//!
//! Loads configuration, opens the catalog database, wires every derived-data
//! job into the job engine, optionally starts the cron scheduler, and serves
//! the HTTP API.

use booru::config::AppConfig;
use booru::db;
use booru::jobs::{
    ApplyFolderTagsJob, CleanupExclusionsJob, CleanupThumbnailsJob, ComputeSimilarityJob,
    DerivedDataJob, ExtractMetadataJob, FindDuplicatesJob, GenerateThumbnailsJob, JobEngine,
    SanitizeTagNamesJob, ScanAllLibrariesJob, Scheduler,
};
use booru::media::{DefaultMediaProcessor, MediaProcessor};
use booru::{api, telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = AppConfig::load()?;
    config.validate()?;

    info!(bind_address = %config.server.bind_address, "booru starting");

    let pool = db::init_pool(&config.storage.database_url).await?;
    db::init_schema(&pool).await?;

    let processor: Arc<dyn MediaProcessor> = Arc::new(DefaultMediaProcessor);
    let thumbnail_root = PathBuf::from(&config.storage.thumbnail_path);

    let handlers: Vec<Arc<dyn DerivedDataJob>> = vec![
        Arc::new(ScanAllLibrariesJob::new(config.scanner.parallelism)),
        Arc::new(ExtractMetadataJob::new(
            processor.clone(),
            config.processing.metadata_parallelism,
        )),
        Arc::new(ApplyFolderTagsJob),
        Arc::new(SanitizeTagNamesJob),
        Arc::new(FindDuplicatesJob::new(config.similarity.clone())),
        Arc::new(GenerateThumbnailsJob::new(
            processor.clone(),
            config.processing.thumbnail_parallelism,
            thumbnail_root.clone(),
        )),
        Arc::new(ComputeSimilarityJob::new(config.processing.similarity_parallelism)),
        Arc::new(CleanupExclusionsJob),
        Arc::new(CleanupThumbnailsJob::new(thumbnail_root)),
    ];

    let job_engine = Arc::new(JobEngine::new(pool.clone(), handlers));

    if config.processing.run_scheduler {
        let scheduler = Scheduler::new(pool.clone(), job_engine.clone());
        tokio::spawn(scheduler.run());
        info!("scheduler started");
    } else {
        info!("scheduler disabled (processing.run_scheduler = false)");
    }

    let state = api::ApiState { pool, job_engine };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
