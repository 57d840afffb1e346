use clap::{Parser, Subcommand};
use proxylens::config::resolve_config_path;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "proxylens")]
#[command(about = "Reverse-proxy access log collector and query API", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the API and run scheduled collections (default)
    Run,
    /// Run one collection now and exit
    Collect,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a documented starter config
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and validate the config, then exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxylens=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run) | None => {
            proxylens::cli::run::run(config_path).await?;
        }
        Some(Commands::Collect) => {
            proxylens::cli::collect::collect(config_path).await?;
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => {
                proxylens::cli::config::init(stdout)?;
            }
            ConfigAction::Validate => {
                proxylens::cli::config::validate(config_path)?;
            }
        },
    }

    Ok(())
}
