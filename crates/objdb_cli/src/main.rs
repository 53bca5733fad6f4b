//! objdb CLI
//!
//! Command-line tools for objdb store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display collections, counts and sizes
//! - `export` - Write a collection as JSON
//! - `import` - Load a JSON file into a collection
//! - `compact` - Rewrite the log to reclaim space
//! - `copy` - Write a consistent copy of the store

mod commands;
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use store::Store;
use tracing_subscriber::EnvFilter;

/// objdb command-line store tools.
#[derive(Parser)]
#[command(name = "objdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory (`<name>.objdb` or `<name>.objdb-enc`)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// File holding the 32-byte key of an encrypted store
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display collections, counts and sizes
    Inspect {
        /// Include the schema
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a collection as a JSON array
    Export {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Load a JSON array into a collection in one transaction
    Import {
        /// Collection name
        #[arg(short, long)]
        collection: String,

        /// JSON file to import
        input: PathBuf,
    },

    /// Rewrite the log to hold only live objects
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Write a consistent copy of the store into a new directory
    Copy {
        /// Target store directory; must not exist
        target: PathBuf,
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

    if let Commands::Version = cli.command {
        let (major, minor) = objdb_core::FORMAT_VERSION;
        println!("objdb CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Store format {major}.{minor}, log record version {}", objdb_core::LOG_VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    let store = Store::open(&path, cli.key_file.as_deref())?;
    let result = match cli.command {
        Commands::Inspect { schema, format } => commands::inspect::run(&store, schema, &format),
        Commands::Export {
            collection,
            output,
            pretty,
        } => commands::export::run(&store, &collection, output.as_deref(), pretty),
        Commands::Import { collection, input } => {
            commands::import::run(&store, &collection, &input)
        }
        Commands::Compact { dry_run } => commands::compact::run(&store, dry_run),
        Commands::Copy { target } => commands::copy::run(&store, &target),
        Commands::Version => Ok(()),
    };
    store.close()?;
    result?;

    Ok(())
}
