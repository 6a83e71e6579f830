//! Warden CLI
//!
//! Command-line interface for the Warden guard bot.

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use warden_config::Config;
use warden_core::Session;
use warden_media::{BlobSink, BucketSink, CloudinarySink, MediaResolver};
use warden_storage::Storage;
use warden_transport::{
    bridge::BridgeTransport, ConnectionSignal, LoginMethod, Transport,
};

const DB_FILE: &str = "warden.db";
const EVENT_CHANNEL_CAPACITY: usize = 128;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "WhatsApp guard bot: anti-delete, anti-link, group tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground
    Run {
        /// Login method: qr or pairing-code
        #[arg(short, long, default_value = "qr")]
        method: LoginMethod,

        /// Phone number override (defaults to bot.phone_number)
        #[arg(short, long)]
        phone: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Log management commands
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },

    /// Show version
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate,
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Clean up old logs
    Clean,
    /// Show last N lines of the current log
    Tail {
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { method, phone } => {
            let config = Config::load(cli.config.as_deref())?;
            run_bot(config, method, phone, &cli.log_level).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Show => {
                let config = Config::load(cli.config.as_deref())?;
                print_redacted_config(&config)?;
            }
            ConfigCommands::Validate => match Config::load(cli.config.as_deref()) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    eprintln!("Configuration is invalid: {}", e);
                    std::process::exit(1);
                }
            },
        },

        Commands::Logs { action } => {
            let config = Config::load(cli.config.as_deref())?;
            let manager = logging::LogManager::new(config.data_dir().join("logs"));
            match action {
                LogCommands::List => {
                    let files = manager.log_files()?;
                    let total = manager.total_log_size()?;
                    println!(
                        "Log files ({} total):\n",
                        logging::LogManager::format_size(total)
                    );
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let modified: chrono::DateTime<chrono::Local> = metadata.modified()?.into();
                        println!(
                            "  {} ({}, modified {})",
                            file.file_name().unwrap().to_string_lossy(),
                            logging::LogManager::format_size(metadata.len()),
                            modified.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
                LogCommands::Clean => {
                    let before = manager.log_files()?.len();
                    manager.cleanup_old_logs()?;
                    let after = manager.log_files()?.len();
                    println!("Cleaned {} old log file(s)", before.saturating_sub(after));
                }
                LogCommands::Tail { lines } => {
                    let current = manager.current_log_path();
                    if current.exists() {
                        let content = fs::read_to_string(&current)?;
                        let all: Vec<&str> = content.lines().collect();
                        let start = all.len().saturating_sub(lines);
                        for line in &all[start..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current.display());
                    }
                }
            }
        }

        Commands::Version => {
            println!("warden {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

async fn run_bot(
    config: Config,
    method: LoginMethod,
    phone: Option<String>,
    log_level: &str,
) -> Result<()> {
    let data_dir = config.data_dir();
    fs::create_dir_all(&data_dir)?;
    // The config file's log level wins over the flag's default.
    let level = config.core.log_level.as_deref().unwrap_or(log_level);
    let _logging_guard = logging::init_logging(&data_dir.join("logs"), level)?;

    let storage = Storage::new(data_dir.join(DB_FILE))
        .with_context(|| format!("failed to open database in {}", data_dir.display()))?;
    let resolver = Arc::new(build_resolver(&config));
    let bridge = Arc::new(BridgeTransport::new(&config.bridge));

    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let poller = bridge.clone();
    tokio::spawn(async move {
        poller.poll(event_tx).await;
    });

    let phone = phone.unwrap_or_else(|| config.bot.phone_number.clone());
    let transport: Arc<dyn Transport> = bridge;
    let mut session = Session::new(config, storage, transport, resolver);

    let mut signals = session.signals().subscribe();
    tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            match signal {
                ConnectionSignal::QrCodeReady(code) => {
                    println!("Scan this QR code in WhatsApp > Linked Devices:\n{}", code);
                }
                ConnectionSignal::PairingCodeReady(code) => {
                    println!("Pairing code: {}", code);
                }
                ConnectionSignal::Connected => println!("Connected."),
                ConnectionSignal::LoggedOut => {
                    println!("Logged out. Relink the account and run again.");
                }
            }
        }
    });

    info!("Starting Warden session...");
    session.connect(&phone, method).await?;
    session.run(event_rx).await
}

/// Cloudinary is the primary sink when configured; the bucket endpoint is
/// the fallback, or the primary when it is the only one set.
fn build_resolver(config: &Config) -> MediaResolver {
    let cloudinary = config
        .media
        .cloudinary
        .as_ref()
        .map(|c| Arc::new(CloudinarySink::new(c)) as Arc<dyn BlobSink>);
    let bucket = config
        .media
        .bucket
        .as_ref()
        .map(|b| Arc::new(BucketSink::new(b)) as Arc<dyn BlobSink>);

    match (cloudinary, bucket) {
        (Some(primary), fallback) => MediaResolver::new(primary, fallback),
        (None, Some(primary)) => MediaResolver::new(primary, None),
        (None, None) => {
            info!("no blob sink configured; media capture disabled");
            MediaResolver::disabled()
        }
    }
}

fn print_redacted_config(config: &Config) -> Result<()> {
    let mut value = serde_json::to_value(config)?;

    if let Some(token) = value
        .get_mut("media")
        .and_then(|m| m.get_mut("bucket"))
        .and_then(|b| b.get_mut("access_token"))
    {
        if !token.is_null() {
            *token = serde_json::json!("***REDACTED***");
        }
    }
    if let Some(preset) = value
        .get_mut("media")
        .and_then(|m| m.get_mut("cloudinary"))
        .and_then(|c| c.get_mut("upload_preset"))
    {
        *preset = serde_json::json!("***REDACTED***");
    }

    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
