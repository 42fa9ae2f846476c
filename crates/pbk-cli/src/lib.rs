//! PBK CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line front-end for partial backups over a JSON catalogue snapshot.
//!
//! - **Dependencies**: inspect what a selection links to (`pbk deps`,
//!   `pbk graph`, `pbk order`)
//! - **Catalogue**: list entity types by module (`pbk list`)
//! - **Backups**: export and restore through the job pipeline (`pbk export`,
//!   `pbk import`)
//! - **Archives**: summarize an archive without replaying it (`pbk inspect`)
//! - **Schemas**: move definitions only (`pbk schemas export/import`)
//! - **Schedules**: run due backups from a TOML file (`pbk schedule run`)

pub mod commands;
pub mod error;
pub mod progress;
pub mod session;

pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use pbk_engine::archive::ArchiveFormat;
use std::path::PathBuf;

/// PBK - dependency-aware partial backup and restore
#[derive(Parser, Debug)]
#[command(name = "pbk")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Catalogue snapshot the commands operate on
    #[arg(long, env = "PBK_CATALOG", default_value = "catalog.json", global = true)]
    pub catalog: PathBuf,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Summarize the dependencies of a selection
    Deps {
        /// Entity types to analyse
        #[arg(required = true)]
        entity_types: Vec<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print dependency graph nodes and edges as JSON
    Graph {
        #[arg(required = true)]
        entity_types: Vec<String>,
    },

    /// Print the dependency-safe restore order
    Order {
        #[arg(required = true)]
        entity_types: Vec<String>,
    },

    /// List entity types (child tables excluded)
    List {
        /// Only these modules
        #[arg(short, long)]
        module: Vec<String>,
    },

    /// Export entity types into an archive
    Export {
        #[arg(required = true)]
        entity_types: Vec<String>,

        /// Archive format (document, tabular, sql)
        #[arg(short, long, default_value = "document", value_parser = parse_format)]
        format: ArchiveFormat,

        /// Bundle attachments
        #[arg(long)]
        include_files: bool,

        /// Add every transitive link target to the selection
        #[arg(long)]
        include_dependencies: bool,

        /// JSON file with field and table rules
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Where to copy the artifact (defaults to its generated name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Recorded as the archive's creator
        #[arg(long, env = "USER", default_value = "pbk")]
        created_by: String,
    },

    /// Restore an archive into the catalogue
    Import {
        archive: PathBuf,

        /// Only restore these entity types
        #[arg(short, long)]
        select: Vec<String>,

        /// JSON file with field rules
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Leave bundled attachments alone
        #[arg(long)]
        no_files: bool,

        #[arg(long, env = "USER", default_value = "pbk")]
        created_by: String,
    },

    /// Summarize an archive from its manifest
    Inspect {
        archive: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Schema-only transfer
    Schemas {
        #[command(subcommand)]
        command: SchemasCommand,
    },

    /// Recurring backups
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchemasCommand {
    /// Write the definitions of entity types into a zip
    Export {
        #[arg(required = true)]
        entity_types: Vec<String>,

        #[arg(short, long, default_value = "schemas.zip")]
        output: PathBuf,

        #[arg(long, env = "USER", default_value = "pbk")]
        created_by: String,
    },

    /// Create or update definitions from a schema archive
    Import {
        archive: PathBuf,

        #[arg(short, long)]
        select: Vec<String>,

        /// Show what would happen without changing anything
        #[arg(long)]
        preview: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Show schedules and their next run
    List {
        #[arg(long, env = "PBK_SCHEDULE_FILE", default_value = "schedules.toml")]
        file: PathBuf,
    },

    /// Run every due schedule, or one named schedule right now
    Run {
        #[arg(long, env = "PBK_SCHEDULE_FILE", default_value = "schedules.toml")]
        file: PathBuf,

        /// Run this schedule immediately
        #[arg(long)]
        name: Option<String>,

        /// Longest wait for one backup job, in seconds
        #[arg(long, default_value_t = 3600)]
        max_wait_secs: u64,
    },
}

/// Accept the names archives use in their manifest, plus `json`/`csv`.
pub fn parse_format(raw: &str) -> std::result::Result<ArchiveFormat, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("unknown format '{raw}', expected document, tabular or sql"))
}
