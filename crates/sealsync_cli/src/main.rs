//! SealSync CLI
//!
//! Command-line tools for SealSync export files.
//!
//! # Commands
//!
//! - `inspect` - Display record counts and key parameters
//! - `verify` - Check that every record decrypts with the account password
//! - `decrypt` - Print decrypted records
//!
//! The password is read from `--password` or `SEALSYNC_PASSWORD`.

mod commands;

use clap::{Parser, Subcommand};
use sealsync_crypto::KdfCost;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SealSync command-line export tools.
#[derive(Parser)]
#[command(name = "sealsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record counts and key parameters
    Inspect {
        /// Path to the export file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that every record decrypts
    Verify {
        /// Path to the export file
        file: PathBuf,

        /// Account password (defaults to SEALSYNC_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print decrypted records
    Decrypt {
        /// Path to the export file
        file: PathBuf,

        /// Account password (defaults to SEALSYNC_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { file, format } => {
            commands::inspect::run(&file, &format)?;
        }
        Commands::Verify {
            file,
            password,
            format,
        } => {
            let password = commands::resolve_password(password)?;
            commands::verify::run(&file, &password, KdfCost::default(), &format)?;
        }
        Commands::Decrypt {
            file,
            password,
            format,
        } => {
            let password = commands::resolve_password(password)?;
            commands::decrypt::run(&file, &password, KdfCost::default(), &format)?;
        }
        Commands::Version => {
            println!("SealSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Protocol {} / export {}",
                sealsync_protocol::PROTOCOL_VERSION,
                sealsync_protocol::EXPORT_VERSION
            );
        }
    }

    Ok(())
}
