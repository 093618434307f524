//! High-score search reindexer
//!
//! Copies high scores from MySQL into Elasticsearch without downtime for
//! readers of the `high_scores_{mode}` aliases.
//!
//! # Usage
//!
//! ```bash
//! reindex run [--modes osu,taiko] [--resume-from N] [--watch] [--suffix S] [--new-index]
//! reindex checkpoints --alias high_scores_osu
//! reindex swap --alias high_scores_osu --index high_scores_osu_1520000000
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/search-reindex/config.*)
//! 3. `config.*` and `config.{APP_ENV}.*` in the working directory
//! 4. Environment variables (REINDEX__*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use reindex_daemon::{run_indexer, show_checkpoints, swap_alias, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            run_indexer(cli.config.as_deref(), cli.log_level.as_deref(), args).await?;
        }
        Commands::Checkpoints { alias } => {
            show_checkpoints(cli.config.as_deref(), cli.log_level.as_deref(), &alias).await?;
        }
        Commands::Swap { alias, index } => {
            swap_alias(cli.config.as_deref(), cli.log_level.as_deref(), &alias, &index).await?;
        }
    }

    Ok(())
}
