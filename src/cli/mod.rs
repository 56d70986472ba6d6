// src/cli/mod.rs
//! CLI definitions for the anchore worker
//!
//! Command implementations live in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anchore-worker")]
#[command(version)]
#[command(about = "Scan container images from a CI build step through a helper container", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one scan execution for a build
    Scan {
        /// Build workspace holding the manifest and optional inputs
        #[arg(short, long)]
        workspace: PathBuf,

        /// Job name, first half of the build id
        #[arg(short, long)]
        job: String,

        /// Build number, second half of the build id
        #[arg(short, long)]
        build: String,

        /// Config file (default: per-user config, then built-in defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Copy the report directory under this artifacts root
        #[arg(short, long)]
        artifacts: Option<PathBuf>,

        /// Write the verdict record here instead of stdout
        #[arg(short, long)]
        record: Option<PathBuf>,

        /// Verbose scanner output and debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Print the effective configuration with credentials masked
    ShowConfig {
        /// Config file (default: per-user config, then built-in defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
