use clap::{Parser, Subcommand};
use daedalus_core::EntityKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "daedalus")]
#[command(about = "Daedalus - pipeline operations metadata store", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create entity tables that do not exist yet
    InitDb {
        /// Entity to create (repeatable, default: all)
        #[arg(long = "entity")]
        entities: Vec<EntityKind>,
    },

    /// Insert or update records from a JSON array
    Load {
        /// Target entity (e.g. task_type)
        #[arg(long)]
        entity: EntityKind,

        /// JSON file, or - for stdin
        #[arg(long)]
        file: PathBuf,

        /// Roll back instead of committing
        #[arg(long)]
        dry_run: bool,
    },

    /// Print one row by primary key
    Get {
        #[arg(long)]
        entity: EntityKind,

        /// Primary key value
        #[arg(long)]
        key: String,
    },

    /// Print the table DDL
    Schema {
        /// Only this entity (default: all)
        #[arg(long)]
        entity: Option<EntityKind>,
    },
}
