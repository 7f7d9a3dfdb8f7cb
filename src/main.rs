use anyhow::Result;
use clap::Parser;

mod budget;
mod cli;
mod commands;
mod platform;

use cli::{Args, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config_path = commands::budget::resolve_config_path(args.config)?;

    match args.command {
        Commands::Run => commands::budget::run(&config_path),
        Commands::CheckConfig => commands::budget::check_config(&config_path),
        Commands::Init { output, force } => {
            commands::budget::init(output.unwrap_or(config_path), force)
        }
    }
}

/// Initialize logging
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}
