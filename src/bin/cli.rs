//! Booru CLI for operating a catalog without the HTTP API: library
//! management, one-shot library sync, job control, and duplicate-group
//! resolution.

use booru::config::AppConfig;
use booru::db::{self, duplicates, libraries};
use booru::jobs::{
    ApplyFolderTagsJob, CleanupExclusionsJob, CleanupThumbnailsJob, ComputeSimilarityJob,
    DerivedDataJob, ExtractMetadataJob, FindDuplicatesJob, GenerateThumbnailsJob, JobEngine,
    JobMode, LibraryRoots, SanitizeTagNamesJob, ScanAllLibrariesJob,
};
use booru::media::{DefaultMediaProcessor, MediaProcessor};
use booru::resolver;
use booru::sync::{LibrarySynchronizer, NoopProgressSink};
use booru::telemetry;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "booru")]
#[command(about = "Operate a booru media catalog from the command line", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Library management
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
    /// Run the library synchronizer once, outside the job engine
    Sync {
        /// Library id; omit to sync every configured library
        #[arg(long)]
        library_id: Option<i64>,
    },
    /// Background job control
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Duplicate-group resolution
    Duplicates {
        #[command(subcommand)]
        action: DuplicateAction,
    },
}

#[derive(Subcommand)]
enum LibraryAction {
    /// List configured libraries
    List,
    /// Register a new library
    Add {
        name: String,
        path: String,
        #[arg(long, default_value_t = 24)]
        scan_interval_hours: i64,
    },
    /// Remove a library and its catalog entries
    Remove { id: i64 },
}

#[derive(Subcommand)]
enum JobAction {
    /// List the jobs the engine knows how to run
    List,
    /// Start a job by key
    Start {
        key: String,
        #[arg(long, value_enum, default_value_t = JobModeArg::Missing)]
        mode: JobModeArg,
    },
    /// Show running jobs
    Active,
    /// Show job execution history
    History {
        #[arg(long, default_value_t = 0)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
    /// Cancel a running execution
    Cancel { execution_id: i64 },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum JobModeArg {
    Missing,
    All,
}

impl From<JobModeArg> for JobMode {
    fn from(value: JobModeArg) -> Self {
        match value {
            JobModeArg::Missing => JobMode::Missing,
            JobModeArg::All => JobMode::All,
        }
    }
}

#[derive(Subcommand)]
enum DuplicateAction {
    /// List unresolved duplicate groups
    List,
    /// Keep one post in a group, merging the rest into it
    KeepOne { group_id: i64, post_id: i64 },
    /// Keep the whole group as-is without merging
    KeepAll { group_id: i64 },
    /// Drop one post from a group without deleting it
    Exclude { group_id: i64, post_id: i64 },
    /// Drop one post from a group and delete its file
    DeleteWithFile { group_id: i64, post_id: i64 },
    /// Resolve every same-folder partition in a group, deleting losers' files
    ResolveSameFolder { group_id: i64 },
    /// Re-mark a resolved group as unresolved
    MarkUnresolved { group_id: i64 },
    /// Re-mark every resolved group as unresolved
    MarkAllUnresolved,
    /// Resolve every unresolved group by keeping its best-quality member
    ResolveAll,
    /// Resolve every unresolved exact-duplicate group
    ResolveAllExact,
    /// Resolve every same-folder partition across all unresolved groups
    ResolveAllSameFolder {
        #[arg(long)]
        exact_only: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let config = AppConfig::load()?;
    config.validate()?;

    let pool = db::init_pool(&config.storage.database_url).await?;
    db::init_schema(&pool).await?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Library { action } => run_library(&pool, action).await?,
        Commands::Sync { library_id } => run_sync(&pool, &config, library_id).await?,
        Commands::Job { action } => run_job(&pool, &config, action).await?,
        Commands::Duplicates { action } => run_duplicates(&pool, action).await?,
    }

    Ok(())
}

async fn run_library(pool: &sqlx::SqlitePool, action: LibraryAction) -> anyhow::Result<()> {
    match action {
        LibraryAction::List => {
            for library in libraries::list_libraries(pool).await? {
                println!(
                    "{:>4}  {:<24} {} ({}h)",
                    library.id,
                    library.name.green(),
                    library.path,
                    library.scan_interval_hours
                );
            }
        }
        LibraryAction::Add { name, path, scan_interval_hours } => {
            let library = libraries::create_library(pool, &name, &path, scan_interval_hours).await?;
            println!("{} library {} ({})", "created".green(), library.name, library.id);
        }
        LibraryAction::Remove { id } => {
            libraries::delete_library(pool, id).await?;
            println!("{} library {}", "removed".yellow(), id);
        }
    }
    Ok(())
}

async fn run_sync(pool: &sqlx::SqlitePool, config: &AppConfig, library_id: Option<i64>) -> anyhow::Result<()> {
    let targets = match library_id {
        Some(id) => vec![libraries::get_library(pool, id).await?],
        None => libraries::list_libraries(pool).await?,
    };

    for library in targets {
        let synchronizer = LibrarySynchronizer::new(pool.clone(), config.scanner.parallelism);
        let report = synchronizer
            .sync(&library, &NoopProgressSink, &CancellationToken::new())
            .await?;
        println!(
            "{} {}: +{} ~{} -{} moved {}",
            "synced".green(),
            library.name,
            report.added,
            report.updated,
            report.removed,
            report.moved
        );
    }
    Ok(())
}

async fn run_job(pool: &sqlx::SqlitePool, config: &AppConfig, action: JobAction) -> anyhow::Result<()> {
    let engine = build_job_engine(pool.clone(), config);

    match action {
        JobAction::List => {
            for descriptor in engine.get_available_jobs() {
                println!("{:<24} {}", descriptor.key.cyan(), descriptor.description);
            }
        }
        JobAction::Start { key, mode } => {
            let execution_id = engine.start_job(&key, mode.into()).await?;
            println!("{} {} as execution {}", "started".green(), key, execution_id);
        }
        JobAction::Active => {
            for info in engine.get_active_jobs().await {
                println!(
                    "{:<24} {} ({:?}/{:?})",
                    info.key.cyan(),
                    info.state.activity_text,
                    info.state.progress_current,
                    info.state.progress_total
                );
            }
        }
        JobAction::History { page, page_size } => {
            let (items, total) = engine.get_job_history(page, page_size).await?;
            for execution in items {
                println!(
                    "{:>4}  {:<24} {} {}",
                    execution.id,
                    execution.job_name,
                    execution.status,
                    execution.error_message.unwrap_or_default()
                );
            }
            println!("{} total", total);
        }
        JobAction::Cancel { execution_id } => {
            engine.cancel_job(execution_id).await;
            println!("{} execution {}", "cancelled".yellow(), execution_id);
        }
    }
    Ok(())
}

fn build_job_engine(pool: sqlx::SqlitePool, config: &AppConfig) -> Arc<JobEngine> {
    let processor: Arc<dyn MediaProcessor> = Arc::new(DefaultMediaProcessor);
    let thumbnail_root = PathBuf::from(&config.storage.thumbnail_path);

    let handlers: Vec<Arc<dyn DerivedDataJob>> = vec![
        Arc::new(ScanAllLibrariesJob::new(config.scanner.parallelism)),
        Arc::new(ExtractMetadataJob::new(processor.clone(), config.processing.metadata_parallelism)),
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

    Arc::new(JobEngine::new(pool, handlers))
}

async fn run_duplicates(pool: &sqlx::SqlitePool, action: DuplicateAction) -> anyhow::Result<()> {
    match action {
        DuplicateAction::List => {
            for group in duplicates::list_unresolved(pool).await? {
                println!("{:>4}  {}", group.id, group.group_type);
            }
        }
        DuplicateAction::KeepOne { group_id, post_id } => {
            resolver::keep_one(pool, group_id, post_id).await?;
            println!("{} group {} keeping post {}", "resolved".green(), group_id, post_id);
        }
        DuplicateAction::KeepAll { group_id } => {
            resolver::keep_all(pool, group_id).await?;
            println!("{} group {} as-is", "kept".green(), group_id);
        }
        DuplicateAction::Exclude { group_id, post_id } => {
            resolver::exclude_one(pool, group_id, post_id).await?;
            println!("{} post {} from group {}", "excluded".yellow(), post_id, group_id);
        }
        DuplicateAction::DeleteWithFile { group_id, post_id } => {
            let roots = LibraryRoots::load(pool).await?;
            resolver::delete_one_with_file(pool, group_id, post_id, &roots).await?;
            println!("{} post {} from group {}", "deleted".red(), post_id, group_id);
        }
        DuplicateAction::ResolveSameFolder { group_id } => {
            let roots = LibraryRoots::load(pool).await?;
            resolver::resolve_same_folder_group(pool, group_id, &roots).await?;
            println!("{} same-folder group {}", "resolved".green(), group_id);
        }
        DuplicateAction::MarkUnresolved { group_id } => {
            resolver::mark_unresolved(pool, group_id).await?;
            println!("{} group {}", "reopened".yellow(), group_id);
        }
        DuplicateAction::MarkAllUnresolved => {
            let count = resolver::mark_all_unresolved(pool).await?;
            println!("{} {} groups", "reopened".yellow(), count);
        }
        DuplicateAction::ResolveAll => {
            let count = resolver::resolve_all(pool).await?;
            println!("{} {} groups", "resolved".green(), count);
        }
        DuplicateAction::ResolveAllExact => {
            let count = resolver::resolve_all_exact(pool).await?;
            println!("{} {} exact groups", "resolved".green(), count);
        }
        DuplicateAction::ResolveAllSameFolder { exact_only } => {
            let roots = LibraryRoots::load(pool).await?;
            let count = resolver::resolve_all_same_folder(pool, &roots, exact_only).await?;
            println!("{} {} same-folder partitions", "resolved".green(), count);
        }
    }
    Ok(())
}
