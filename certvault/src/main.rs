//! certvault - certificate storage on Google Secret Manager
//!
//! Command line access to the key/value store and its locks, plus a local
//! Secret Manager emulator for development.

use anyhow::Context;
use certvault::{CertStorage, Config, OpContext, SecretManagerStorage};
use certvault_secretmanager::EmulatorState;
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "certvault")]
#[command(about = "Certificate storage on Google Secret Manager", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./certvault.toml when present)
    #[arg(short, long, env = "CERTVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Project owning the secrets
    #[arg(long)]
    project_id: Option<String>,

    /// Service account key file
    #[arg(long)]
    credentials_file: Option<PathBuf>,

    /// Secret Manager endpoint, e.g. http://localhost:8085 for the emulator
    #[arg(long)]
    endpoint: Option<String>,

    /// Per-operation timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTVAULT_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve an in-memory Secret Manager emulator
    Emulator {
        #[arg(long, default_value = "127.0.0.1", env = "CERTVAULT_EMULATOR_HOST")]
        host: String,

        #[arg(short, long, default_value = "8085", env = "CERTVAULT_EMULATOR_PORT")]
        port: u16,
    },

    #[command(flatten)]
    Storage(StorageCommand),
}

#[derive(Subcommand, Debug)]
enum StorageCommand {
    /// Store a value read from a file or stdin
    Store {
        key: String,
        /// Read the value from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write the latest value of a key to stdout
    Load { key: String },
    /// Delete a key
    Delete { key: String },
    /// Exit with status 1 if the key does not exist
    Exists { key: String },
    /// List keys starting with a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Show key metadata
    Stat { key: String },
    /// Take a lock, hold it, then release it
    Lock {
        name: String,
        /// Release after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        hold_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "certvault={level},certvault_secretmanager={level}",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;

    match args.command {
        Command::Emulator { host, port } => serve_emulator(&host, port).await,
        Command::Storage(command) => {
            let storage = SecretManagerStorage::from_config(&config)
                .context("failed to initialize secret manager storage")?;
            run(&storage, command, config.timeout()).await
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(project_id) = &args.project_id {
        config.project_id = project_id.clone();
    }
    if let Some(path) = &args.credentials_file {
        config.credentials_file = Some(path.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }

    Ok(config)
}

async fn run(
    storage: &SecretManagerStorage,
    command: StorageCommand,
    timeout: Duration,
) -> anyhow::Result<()> {
    let ctx = OpContext::with_timeout(timeout);

    match command {
        StorageCommand::Store { key, file } => {
            let value = match file {
                Some(path) => std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            storage.store(&ctx, &key, &value).await?;
            info!(key = %key, bytes = value.len(), "stored");
        }
        StorageCommand::Load { key } => {
            let value = storage.load(&ctx, &key).await?;
            std::io::stdout().write_all(&value)?;
        }
        StorageCommand::Delete { key } => {
            storage.delete(&ctx, &key).await?;
            info!(key = %key, "deleted");
        }
        StorageCommand::Exists { key } => {
            if !storage.exists(&ctx, &key).await {
                std::process::exit(1);
            }
        }
        StorageCommand::List { prefix, recursive } => {
            for key in storage.list(&ctx, &prefix, recursive).await? {
                println!("{}", key);
            }
        }
        StorageCommand::Stat { key } => {
            let info = storage.stat(&ctx, &key).await?;
            println!(
                "{}\t{}\tterminal={}",
                info.key,
                info.modified.to_rfc3339(),
                info.is_terminal
            );
        }
        StorageCommand::Lock { name, hold_secs } => {
            storage.lock(&ctx, &name).await?;
            info!(lock = %name, "holding lock");

            match hold_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => tokio::signal::ctrl_c().await?,
            }

            // The acquire deadline may have passed while holding
            storage.unlock(&OpContext::with_timeout(timeout), &name).await?;
        }
    }

    Ok(())
}

async fn serve_emulator(host: &str, port: u16) -> anyhow::Result<()> {
    let app = certvault_secretmanager::router(Arc::new(EmulatorState::new()));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Secret Manager emulator listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
