use anyhow::Result;
use clap::{Parser, Subcommand};
use docker_volume_backup::managers::logging;
use docker_volume_backup::{config, storage, utils, BackupDependencies, BackupManager};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docker-volume-backup")]
#[command(about = "Back up Docker volumes to local and remote storage", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/docker-volume-backup/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup (default)
    Run,

    /// Validate configuration file and required binaries
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            logging::init_console_logging();
            handle_validate(&cli.config)
        }
        Commands::Run => handle_run(&cli.config),
    }
}

fn handle_run(config_path: &PathBuf) -> Result<()> {
    let config = config::load_config(config_path)?;

    // Setup logging with file rotation (must keep guard alive)
    let logging_config = logging::LoggingConfig::from_config(
        &config.logging.directory,
        &config.logging.level,
        config.logging.max_files,
    );
    let log_guard = logging::init_logging(&logging_config)?;

    let deps = BackupDependencies::from_config(&config)?;
    let manager = BackupManager::new(config, deps).with_log_capture(log_guard.capture());

    manager.run()
}

fn handle_validate(config_path: &PathBuf) -> Result<()> {
    let config = config::load_config(config_path)?;
    let backends = storage::build_backends(
        &config.storage,
        Arc::new(utils::executor::RealExecutor::new()),
    )?;

    println!("Configuration is valid!");
    println!("Sources: {}", config.backup.sources.len());
    println!(
        "Storage backends: {}",
        if backends.is_empty() {
            "none".to_string()
        } else {
            backends
                .iter()
                .map(|backend| backend.name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    );
    match config.backup.retention_days {
        Some(days) => println!("Retention: {} day(s), prefix {:?}", days, config::pruning_prefix(&config.backup)),
        None => println!("Retention: disabled"),
    }

    let mut missing = Vec::new();
    if which::which("docker").is_err() {
        missing.push("docker");
    }
    if config.storage.ssh.is_some() && which::which("ssh").is_err() {
        missing.push("ssh");
    }
    if config.backup.gpg_passphrase_file.is_some() && which::which("gpg").is_err() {
        missing.push("gpg");
    }
    for binary in &missing {
        eprintln!("⚠️  Required binary not found in PATH: {}", binary);
    }

    Ok(())
}
