mod commands;

use std::net::IpAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use wabridge::config::DEFAULT_CONFIG_FILE;

// ============================================================================
// CLI Types
// ============================================================================

/// wabridge - HTTP bridge for a WhatsApp session
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server and the WhatsApp session
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "WABRIDGE_CONFIG")]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long, env = "WABRIDGE_HOST")]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long, env = "WABRIDGE_PORT")]
        port: Option<u16>,
    },

    /// Show the connection state of a running server
    Status {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "WABRIDGE_CONFIG")]
        config: String,

        /// Server URL (defaults to the configured host and port)
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Ask a running server to connect its session
    Connect {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "WABRIDGE_CONFIG")]
        config: String,

        /// Server URL (defaults to the configured host and port)
        #[arg(short, long)]
        server: Option<String>,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    install_panic_hook();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => commands::serve::run(&config, host, port).await,
        Commands::Status { config, server } => {
            commands::status::run(&config, server.as_deref()).await
        }
        Commands::Connect { config, server } => {
            commands::connect::run(&config, server.as_deref()).await
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Route panics through tracing. Panics in spawned tasks only end that task.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(location = %location, panic = %payload, "Panic");
    }));
}
