//! Configstore CLI
//!
//! Operator tools for Configstore schemas and transactions.
//!
//! # Commands
//!
//! - `inspect-schema` - Check a schema file and print its kinds
//! - `apply` - Run transaction files against a fresh in-memory store

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Configstore command-line tools.
#[derive(Parser)]
#[command(name = "configstore")]
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
    /// Check a schema file and print its kinds, fields and indexes
    InspectSchema {
        /// Path to schema.json
        schema: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: Format,
    },

    /// Apply JSON transactions, in order, to a fresh in-memory store
    Apply {
        /// Path to schema.json
        schema: PathBuf,

        /// Transaction files
        #[arg(required = true)]
        transactions: Vec<PathBuf>,
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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::InspectSchema { schema, format } => {
            commands::inspect_schema::run(&schema, format)?;
        }
        Commands::Apply {
            schema,
            transactions,
        } => {
            commands::apply::run(&schema, &transactions)?;
        }
        Commands::Version => {
            println!("Configstore CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
