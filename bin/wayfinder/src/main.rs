mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "wayfinder")]
#[command(about = "Component-library assistant backed by a local model and an MCP knowledge service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.wayfinder/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Onboard {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show backend and capability service status
    Status,

    /// List the capability catalog and what the service offers
    Tools,

    /// Talk to the assistant
    Chat {
        /// Message to send (interactive mode if not provided)
        #[arg(short, long)]
        message: Option<String>,

        /// Print the answer in one piece instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Model name (overrides config backend.model)
        #[arg(long)]
        model: Option<String>,

        /// Backend API base, e.g. http://localhost:11434/api
        #[arg(long)]
        backend_url: Option<String>,

        /// Command line that starts the MCP capability server
        #[arg(long)]
        mcp_command: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config;

    match cli.command {
        Commands::Onboard { force } => {
            commands::onboard::run(config_path, force).await?;
        }
        Commands::Status => {
            commands::status::run(config_path).await?;
        }
        Commands::Tools => {
            commands::tools_cmd::run(config_path).await?;
        }
        Commands::Chat {
            message,
            no_stream,
            model,
            backend_url,
            mcp_command,
        } => {
            let overrides = commands::Overrides {
                model,
                backend_url,
                mcp_command,
            };
            commands::chat::run(config_path, overrides, message, !no_stream).await?;
        }
    }

    Ok(())
}
