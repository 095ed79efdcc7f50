//! Overture CLI entry point
//!
//! Parses arguments, initializes logging, and routes to the selected
//! service loop or inspection command.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use overture::cli::{execute, Cli};
use overture::config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => Settings::from_env().log_level,
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = execute(cli.command).await {
        tracing::error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
