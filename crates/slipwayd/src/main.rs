//! slipwayd — the Slipway daemon.
//!
//! Single binary that assembles the release orchestrator:
//! - State store (redb)
//! - Artifact resolver + registry client
//! - Credential broker
//! - Desired-state composer
//! - Rollout controller + health verifier
//! - REST API
//!
//! # Usage
//!
//! ```text
//! slipwayd serve --port 8600 --data-dir /var/lib/slipway --config slipway.toml
//! ```

mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use slipway_core::SlipwayConfig;

#[derive(Parser)]
#[command(name = "slipwayd", about = "Slipway release orchestrator daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8600")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/slipway")]
        data_dir: PathBuf,

        /// Path to slipway.toml.
        #[arg(long, default_value = "slipway.toml")]
        config: PathBuf,

        /// Run against in-memory platform fakes instead of the
        /// configured endpoints. State stays durable.
        #[arg(long)]
        fake_platform: bool,
    },

    /// Generate a slipway.toml scaffold.
    Init {
        /// Destination path.
        #[arg(long, default_value = "slipway.toml")]
        path: PathBuf,

        /// Service name.
        #[arg(long)]
        name: String,

        /// Registry host images are pushed to.
        #[arg(long)]
        registry: String,

        /// Repository under the registry.
        #[arg(long)]
        repository: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slipwayd=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            fake_platform,
        } => serve::run(port, data_dir, config, fake_platform).await,
        Command::Init {
            path,
            name,
            registry,
            repository,
        } => init(&path, &name, &registry, &repository),
    }
}

fn init(path: &Path, name: &str, registry: &str, repository: &str) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("refusing to overwrite existing {}", path.display());
    }
    let config = SlipwayConfig::scaffold(name, registry, repository);
    std::fs::write(path, config.to_toml_string()?)?;
    println!("wrote {}", path.display());
    Ok(())
}
