//! # docvault
//!
//! The `docvault` binary runs a multi-tenant RAG service: users
//! authenticate, belong to workspaces, ingest text documents, and query a
//! per-workspace vector index of document chunks under a
//! classification-based access policy.
//!
//! ## Usage
//!
//! ```bash
//! docvault --config ./config/docvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvault init` | Create the SQLite database and run schema migrations |
//! | `docvault serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docvault::{config, db, migrate, server};

/// docvault — a multi-tenant RAG service with classification-based
/// access control.
#[derive(Parser)]
#[command(
    name = "docvault",
    about = "A multi-tenant retrieval-augmented-generation service with classification-based access control",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("database initialized at {}", config.db.path.display());
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}
