//! Command-line surface. Kept deliberately small: everything that isn't
//! "where's the config file" or "how noisy should logging be" belongs in
//! the config file, not a flag.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "nwws-relay", about = "NWWS-OI ingestion-to-fan-out relay")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "nwws-relay.toml")]
    pub config: PathBuf,

    /// Load and validate configuration, then exit without connecting.
    #[arg(long)]
    pub dry_run: bool,

    /// Increase log verbosity; may be repeated (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
