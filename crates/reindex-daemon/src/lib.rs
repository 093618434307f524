//! Reindexer binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, checkpoints, swap)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, RunArgs};
pub use commands::{
    apply_run_overrides, init_logging, load_schema, load_settings, open_checkpoint_store,
    run_indexer, show_checkpoints, spawn_shutdown_listener, swap_alias,
};
