//! sessionguard - keep an API login alive from the terminal.
//!
//! Signs in against the auth API, shows and revokes server-side sessions,
//! and runs the session lifecycle manager interactively.

mod commands;
mod context;
mod logging;
mod router;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use commands::Commands;

#[derive(Parser)]
#[command(name = "sessionguard")]
#[command(about = "Keep a bearer-token session valid against a remote API")]
#[command(version)]
struct Cli {
    /// API base URL (overrides config and SESSIONGUARD_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Keychain profile the credential is stored under
    #[arg(long, global = true, default_value = "default")]
    profile: String,

    /// Also write logs to a daily file in the cache directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_dir = if cli.log_file {
        default_log_dir()
    } else {
        None
    };
    let _log_guard = logging::init_tracing(log_dir);
    info!("sessionguard starting");

    let ctx = match context::Context::load(cli.api_url, &cli.profile) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli.command.execute(ctx).await {
        error!("Command failed: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

fn default_log_dir() -> Option<std::path::PathBuf> {
    sessionguard_core::AppConfig::default()
        .cache_dir()
        .ok()
        .map(|dir| dir.join("logs"))
}
