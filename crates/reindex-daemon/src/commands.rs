//! Command implementations for the reindexer.
//!
//! Handles:
//! - `run`: index each selected ruleset once, or forever in watch mode
//! - `checkpoints`: list checkpoints recorded under an alias
//! - `swap`: repoint an alias by hand

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use reindex_indexing::{
    CheckpointStore, ElasticCheckpointStore, IndexLifecycleManager, IndexingError, Orchestrator,
    PipelineConfig, RocksCheckpointStore, RunRequest,
};
use reindex_sink::{ElasticsearchClient, SearchSink};
use reindex_source::{connect, CategoryRegistry, HIGH_SCORES_SCHEMA};
use reindex_types::{timestamp_suffix, CheckpointBackend, Settings};

use crate::cli::RunArgs;

/// Load settings and apply the global CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Apply `run` flags on top of loaded settings.
pub fn apply_run_overrides(settings: &mut Settings, args: &RunArgs) -> Result<()> {
    if let Some(modes) = &args.modes {
        settings.modes = modes.clone();
    }
    if args.resume_from.is_some() {
        settings.resume_from = args.resume_from;
    }
    if args.watch {
        settings.watch = true;
    }
    settings.validate().context("Invalid run options")?;
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Index schema: the configured file, or the embedded high-score schema.
pub fn load_schema(settings: &Settings) -> Result<Value> {
    match &settings.schema_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read schema file {}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("Invalid schema JSON in {}", path))
        }
        None => serde_json::from_str(HIGH_SCORES_SCHEMA).context("Invalid embedded schema"),
    }
}

/// Open the configured checkpoint backend.
pub fn open_checkpoint_store(
    settings: &Settings,
    client: Arc<ElasticsearchClient>,
) -> Result<Arc<dyn CheckpointStore>> {
    match settings.checkpoint.backend {
        CheckpointBackend::Elasticsearch => Ok(Arc::new(ElasticCheckpointStore::new(
            client,
            settings.index_meta_name(),
        ))),
        CheckpointBackend::Rocksdb => {
            let path = Path::new(&settings.checkpoint.path);
            std::fs::create_dir_all(path).with_context(|| {
                format!("Failed to create checkpoint directory {}", path.display())
            })?;
            let store = RocksCheckpointStore::open(path).with_context(|| {
                format!("Failed to open checkpoint store at {}", path.display())
            })?;
            Ok(Arc::new(store))
        }
    }
}

fn connect_sink(settings: &Settings) -> Result<Arc<ElasticsearchClient>> {
    let client = ElasticsearchClient::new(&settings.elasticsearch)
        .context("Failed to build Elasticsearch client")?;
    Ok(Arc::new(client))
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
pub fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    });
}

/// `reindex run`
pub async fn run_indexer(
    config_path: Option<&str>,
    log_level: Option<&str>,
    args: RunArgs,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    apply_run_overrides(&mut settings, &args)?;
    init_logging(&settings.log_level)?;

    let schema = load_schema(&settings)?;
    let client = connect_sink(&settings)?;
    let checkpoints = open_checkpoint_store(&settings, client.clone())?;
    let sink: Arc<dyn SearchSink> = client;

    info!(modes = ?settings.modes, "Connecting to source database");
    let pool = connect(&settings.database_url)
        .await
        .context("Failed to connect to source database")?;
    let registry = CategoryRegistry::high_scores();

    // Every mode of one invocation shares the suffix of any index it creates.
    let suffix = args.suffix.clone().unwrap_or_else(timestamp_suffix);
    let request = RunRequest {
        resume_from: settings.resume_from,
        force_new: args.new_index,
    };
    let config = PipelineConfig::from_settings(&settings);

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let mut orchestrators = Vec::with_capacity(settings.modes.len());
    for mode in &settings.modes {
        let source = registry
            .open(mode, pool.clone())
            .with_context(|| format!("Failed to open source for mode {}", mode))?;
        let orchestrator = Orchestrator::new(
            source,
            sink.clone(),
            checkpoints.clone(),
            schema.clone(),
            settings.alias_for_mode(mode),
            config.clone(),
        )
        .with_suffix(Some(suffix.clone()));
        orchestrators.push(orchestrator);
    }

    if settings.watch {
        watch_all(orchestrators, request, cancel).await
    } else {
        run_all(orchestrators, request, &cancel).await
    }
}

async fn run_all(
    orchestrators: Vec<Orchestrator>,
    request: RunRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    for orchestrator in orchestrators {
        match orchestrator.run_once(request, cancel).await {
            Ok(summary) => {
                println!(
                    "{} -> {} ({}): {} records in {:.1}s, {:.0} records/s, {} failed, last cursor {}",
                    summary.alias,
                    summary.index,
                    summary.resolution,
                    summary.stats.records,
                    summary.elapsed.as_secs_f64(),
                    summary.throughput(),
                    summary.stats.failed_items,
                    summary
                        .last_cursor
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Err(IndexingError::Cancelled) => {
                warn!(alias = %orchestrator.alias(), "Run cancelled; progress is checkpointed");
                return Ok(());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Indexing {} failed", orchestrator.alias()));
            }
        }
    }
    Ok(())
}

async fn watch_all(
    orchestrators: Vec<Orchestrator>,
    request: RunRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for orchestrator in orchestrators {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = orchestrator.watch(request, &cancel).await;
            (orchestrator.alias().to_string(), result)
        });
    }

    let mut failed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((alias, Err(e))) => {
                error!(alias = %alias, error = %e, "Watch stopped");
                // One ruleset failing stops the others too.
                cancel.cancel();
                failed.push(alias);
            }
            Err(e) => {
                error!(error = %e, "Watch task panicked");
                cancel.cancel();
                failed.push("<panicked>".to_string());
            }
        }
    }

    if !failed.is_empty() {
        bail!("Watch failed for {}", failed.join(", "));
    }
    Ok(())
}

/// `reindex checkpoints`
pub async fn show_checkpoints(
    config_path: Option<&str>,
    log_level: Option<&str>,
    alias: &str,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_logging(&settings.log_level)?;

    let client = connect_sink(&settings)?;
    let checkpoints = open_checkpoint_store(&settings, client.clone())?;

    let aliased = client
        .indices_for_alias(alias)
        .await
        .with_context(|| format!("Failed to look up alias {}", alias))?;
    let rows = checkpoints
        .get_by_alias(alias)
        .await
        .with_context(|| format!("Failed to read checkpoints for {}", alias))?;

    if rows.is_empty() {
        println!("No checkpoints recorded for {}", alias);
        return Ok(());
    }

    println!("Checkpoints for {} ({}):", alias, checkpoints.name());
    for checkpoint in rows {
        let marker = if aliased.contains(&checkpoint.physical_index) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<40} last_id={:<20} updated={}",
            marker,
            checkpoint.physical_index,
            checkpoint.last_cursor,
            checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
    }
    Ok(())
}

/// `reindex swap`
pub async fn swap_alias(
    config_path: Option<&str>,
    log_level: Option<&str>,
    alias: &str,
    index: &str,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_logging(&settings.log_level)?;

    let client = connect_sink(&settings)?;
    if !client
        .index_exists(index)
        .await
        .with_context(|| format!("Failed to check index {}", index))?
    {
        bail!("Index {} does not exist", index);
    }

    let checkpoints = open_checkpoint_store(&settings, client.clone())?;
    let schema = load_schema(&settings)?;
    let lifecycle = IndexLifecycleManager::new(client, checkpoints, schema);

    let previous = lifecycle
        .swap_alias(alias, index)
        .await
        .with_context(|| format!("Failed to point {} at {}", alias, index))?;

    if previous.is_empty() {
        println!("{} -> {}", alias, index);
    } else {
        println!("{} -> {} (was {})", alias, index, previous.join(", "));
    }
    Ok(())
}
