//! CLI argument definitions for verigate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use verigate_store::DataType;

/// verigate -- asynchronous company verification jobs.
#[derive(Parser)]
#[command(
    name = "verigate",
    version,
    about = "verigate -- asynchronous company verification jobs",
    long_about = "Creates verification jobs for companies, records the data workers \
                  deliver for them and answers queries over the results."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = "config/default.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending schema migrations and print the schema version.
    Migrate,

    /// Create a verification and publish its request.
    Create {
        /// Tax / registration number of the company (10 or 12 digits).
        subject_id: String,

        /// Data types to fetch, comma-separated (e.g. BASIC_INFORMATION,ACTIVITIES).
        #[arg(long, short, value_delimiter = ',', required = true, value_parser = parse_data_type)]
        types: Vec<DataType>,

        /// Requesting user; defaults to the configured author.
        #[arg(long, short)]
        author: Option<String>,
    },

    /// Show a verification with all of its data.
    Get {
        /// Verification ID.
        id: String,
    },

    /// List verifications, newest first.
    List {
        /// Maximum number of verifications to return.
        #[arg(long, short, allow_negative_numbers = true)]
        limit: Option<i64>,

        /// Number of verifications to skip.
        #[arg(long, short, allow_negative_numbers = true)]
        offset: Option<i64>,
    },

    /// Show a verification with its data under named fields.
    Show {
        /// Verification ID.
        id: String,
    },

    /// Read worker messages from stdin and process them.
    ///
    /// Each line is a JSON envelope: {"topic": "...", "message": {...}}.
    Ingest,

    /// Print row counts and integrity figures.
    Stats,
}

/// Accepts wire names in any case, with `-` or `_` separators.
fn parse_data_type(raw: &str) -> Result<DataType, String> {
    raw.trim()
        .to_ascii_uppercase()
        .replace('-', "_")
        .parse()
        .map_err(|err: verigate_store::StoreError| err.to_string())
}
