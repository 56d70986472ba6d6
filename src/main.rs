// src/main.rs

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::info;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::ScanArgs;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            workspace,
            job,
            build,
            config,
            artifacts,
            record,
            debug,
        } => {
            let mut build_config = commands::load_config(config.as_deref())?;
            build_config.debug |= debug;
            init_tracing(build_config.debug);

            let passed = commands::cmd_scan(
                build_config,
                ScanArgs {
                    workspace,
                    job,
                    build,
                    artifacts,
                    record,
                },
            )?;
            info!("Build step {}", if passed { "passed" } else { "failed" });
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::ShowConfig { config } => {
            init_tracing(false);
            commands::cmd_show_config(config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
