use crate::cli::run::{require_config_path, start_services, Services};
use crate::collection::JobStatus;
use crate::config::parse::load_config;
use std::path::PathBuf;

/// Run a single collection in the foreground and print its outcome.
pub async fn collect(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = require_config_path(config_path);
    let config = load_config(&config_path)?;

    let Services { collector, .. } = start_services(&config).await?;
    let job = collector.collect_once().await?;

    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status == JobStatus::Error {
        eprintln!(
            "Collection failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    Ok(())
}
