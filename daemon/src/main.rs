use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

mod config;
mod daemon;
mod discovery;
mod scheduler;
mod telemetry;
mod watcher;

use config::MirrorConfig;
use daemon::MirrorDaemon;

#[derive(Parser)]
#[command(name = "mirror-daemon")]
#[command(about = "Mirror project directories between the host and their volumes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "mirror-daemon.toml")]
    config: PathBuf,

    /// Log level, overrides the configured one
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mirror in the foreground until Ctrl+C
    Run,
    /// Print the resolved projects and their roots
    Projects,
    /// Validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = MirrorConfig::load(&cli.config).await?;
            let level = cli.log_level.as_deref().unwrap_or(&config.daemon.log_level);
            // flushes the log file on exit
            let _guard = telemetry::init_logging(level, config.daemon.log_file.as_deref())?;
            run_daemon(config).await
        }
        Commands::Projects => {
            telemetry::init_logging(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            show_projects(&cli.config).await
        }
        Commands::Config { action } => {
            telemetry::init_logging(cli.log_level.as_deref().unwrap_or("warn"), None)?;
            match action {
                ConfigActions::Validate => validate_config(&cli.config).await,
                ConfigActions::Show => show_config(&cli.config).await,
                ConfigActions::Generate { output } => generate_config(output.as_ref()).await,
            }
        }
    }
}

async fn run_daemon(config: MirrorConfig) -> Result<()> {
    info!("Starting mirror daemon in foreground mode");
    let daemon = MirrorDaemon::new(config).await?;
    daemon.run().await
}

async fn show_projects(path: &Path) -> Result<()> {
    let config = MirrorConfig::load(path).await?;
    let resolved = config.resolve_projects().await?;

    if let Some(stack) = resolved.layout.stack() {
        println!("Stack: {}", stack);
    }
    for project in &resolved.projects {
        println!("{}", project.name());
        println!("  host:   {}", project.host_root().display());
        println!("  volume: {}", project.volume_root().display());
        if project.watched().is_empty() {
            println!("  polled: (none)");
        } else {
            println!("  polled: {}", project.watched().join(", "));
        }
    }

    Ok(())
}

async fn validate_config(path: &Path) -> Result<()> {
    info!("Validating configuration at {}", path.display());

    let result = async {
        let config = MirrorConfig::load(path).await?;
        let resolved = config.resolve_projects().await?;
        Ok::<_, anyhow::Error>(resolved.projects.len())
    }
    .await;

    match result {
        Ok(count) => {
            println!("✓ Configuration is valid");
            println!("Projects configured: {}", count);
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(path: &Path) -> Result<()> {
    match MirrorConfig::load(path).await {
        Ok(config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Err(e) => {
            println!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn generate_config(output_path: Option<&PathBuf>) -> Result<()> {
    let config = MirrorConfig::default();
    let toml_content = toml::to_string_pretty(&config)?;

    if let Some(path) = output_path {
        tokio::fs::write(path, toml_content).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml_content);
    }

    Ok(())
}
