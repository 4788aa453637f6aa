use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod errors;
mod handlers;
mod output;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search transcripts and text files by meaning
    Search {
        /// Files or folders to search (folders are scanned recursively)
        #[clap(required = true)]
        paths: Vec<PathBuf>,

        /// Run a single query and exit. Without it an interactive prompt starts
        #[clap(short, long, allow_hyphen_values = true)]
        query: Option<String>,

        /// Embedding model to start with
        #[clap(short, long)]
        model: Option<String>,

        /// Print results as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Inspect or maintain the embedding cache
    Cache {
        #[clap(subcommand)]
        action: CacheArgs,
    },
    /// List supported embedding models
    Models {},
}

#[derive(Subcommand, Debug)]
pub enum CacheArgs {
    /// Show entry counts and file size
    Stats {
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Rewrite the cache file without duplicate or dead records
    Compact {},
    /// Delete every cached embedding
    Clear {
        /// Skip confirmation
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },
    /// Delete embeddings not used in the last N days
    Prune {
        #[clap(long)]
        days: u32,
    },
}
