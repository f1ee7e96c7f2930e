//! chatrelay CLI — the main entry point.
//!
//! Commands:
//! - `init`    — Write a default config file
//! - `serve`   — Start the HTTP gateway
//! - `status`  — Show effective configuration
//! - `usage`   — Show a user's usage overview
//! - `pricing` — List known model pricing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "Streaming LLM chat backend with usage accounting",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "chatrelay.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show effective configuration
    Status,

    /// Show a user's usage overview
    Usage {
        /// The user id to report on
        user: String,
    },

    /// List known model pricing
    Pricing,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Init => commands::init::run(&cli.config).await?,
        Commands::Serve { port } => commands::serve::run(&cli.config, port).await?,
        Commands::Status => commands::status::run(&cli.config).await?,
        Commands::Usage { user } => commands::usage::run(&cli.config, &user).await?,
        Commands::Pricing => commands::pricing::run().await?,
    }

    Ok(())
}
