//! CLI argument parsing for the reindexer.
//!
//! Flags given here override every other configuration source.

use clap::{Parser, Subcommand};

/// High-score search reindexer
///
/// Copies rows from MySQL into Elasticsearch in cursor order, resuming from
/// stored checkpoints and swapping aliases once an index is complete.
#[derive(Parser, Debug)]
#[command(name = "reindex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides ~/.config/search-reindex/config.*)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Reindexer commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index the selected rulesets
    Run(RunArgs),

    /// List checkpoints recorded under an alias
    Checkpoints {
        /// Alias to inspect, e.g. high_scores_osu
        #[arg(short, long)]
        alias: String,
    },

    /// Point an alias at a single index
    Swap {
        #[arg(short, long)]
        alias: String,

        /// Physical index the alias should point to
        #[arg(short, long)]
        index: String,
    },
}

/// Options for `reindex run`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Rulesets to index, comma separated (osu, taiko, fruits, mania)
    #[arg(short, long, value_delimiter = ',')]
    pub modes: Option<Vec<String>>,

    /// Start after this cursor instead of the stored checkpoint
    #[arg(long, allow_negative_numbers = true)]
    pub resume_from: Option<i64>,

    /// Keep polling for new rows after each run
    #[arg(short, long)]
    pub watch: bool,

    /// Suffix for newly created indices (default: unix timestamp)
    #[arg(long)]
    pub suffix: Option<String>,

    /// Always build into a new index
    #[arg(long)]
    pub new_index: bool,
}
