use crate::collection::{run_scheduler, Collector, CollectorSettings, JobHandle};
use crate::config::parse::load_config;
use crate::config::Config;
use crate::geo::open_country_lookup;
use crate::parser::LineTemplate;
use crate::source::FilePatterns;
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::traits::Storage;
use crate::web::{run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("template error: {0}")]
    Template(#[from] crate::parser::TemplateError),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

/// Everything a command needs after startup: an initialised store with the
/// job record recovered, and a collector wired to it.
pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub collector: Collector,
}

/// Open storage, recover the job record and build the collector.
pub async fn start_services(config: &Config) -> Result<Services, RunError> {
    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage: Arc<dyn Storage> = Arc::new(DuckDbStorage::new(&config.storage.path)?);
    storage.init_schema().await?;

    let job = JobHandle::restore(storage.as_ref()).await?;

    let template = LineTemplate::compile(&config.parser.template, config.parser.time_format.as_deref())?;
    let patterns = FilePatterns::new(
        &config.collection.live_pattern,
        &config.collection.rotated_pattern,
    )?;
    let geo = open_country_lookup(config.geo.database.as_deref());

    let collector = Collector::new(
        storage.clone(),
        template,
        geo,
        CollectorSettings {
            log_dir: config.collection.log_dir.clone(),
            patterns,
            batch_size: config.collection.batch_size,
        },
        job,
    );

    Ok(Services { storage, collector })
}

/// Exit with a hint when no config file could be found.
pub fn require_config_path(config_path: Option<PathBuf>) -> PathBuf {
    match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/proxylens/config.yml");
            eprintln!("  /etc/proxylens/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'proxylens config init' to generate one.");
            std::process::exit(1);
        }
    }
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    run_service(&config_path).await.map_err(|e| e.into())
}

async fn run_service(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let Services { storage, collector } = start_services(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(
        interval = ?config.collection.interval,
        log_dir = %config.collection.log_dir.display(),
        "Starting collection scheduler"
    );
    let scheduler_handle = tokio::spawn(run_scheduler(
        collector.clone(),
        config.collection.interval,
        config.collection.run_on_startup,
        shutdown_rx.clone(),
    ));

    let state = AppState { collector, storage };
    let web_config = config.web.clone();
    let mut web_handle = tokio::spawn(async move {
        run_server(state, web_config, shutdown_rx)
            .await
            .map_err(|e| RunError::WebServer(e.to_string()))
    });

    info!("Service started, press Ctrl+C to shutdown");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut web_handle => {
            // The server only returns early on failure (e.g. address in use)
            let _ = shutdown_tx.send(true);
            scheduler_handle.await?;
            return result?;
        }
    }

    let _ = shutdown_tx.send(true);

    scheduler_handle.await?;
    match web_handle.await {
        Ok(Ok(())) => info!("Web server stopped"),
        Ok(Err(e)) => error!(error = %e, "Web server error"),
        Err(e) => error!(error = %e, "Web server join error"),
    }

    // An in-flight collection run is not cancelled; its job record is
    // recovered as interrupted on the next start.
    info!("Shutdown complete");

    Ok(())
}
