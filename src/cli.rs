use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Daily screen-time budget enforcer
///
/// Counts down each configured account's daily minutes while its session is
/// active and locks or logs the session off once they run out.
#[derive(Parser, Debug)]
#[command(name = "session-budget")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to the system location)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch sessions and enforce budgets until interrupted
    Run,
    /// Validate the configuration and list managed users
    CheckConfig,
    /// Write an example configuration file
    Init {
        /// Where to write the file (defaults to --config or the system location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
