// src/commands/scan.rs

//! Scan command - one build execution

use anyhow::{Context, Result};
use anchore_worker::config::BuildConfig;
use anchore_worker::exec::ProcessRunner;
use anchore_worker::report::DirectoryArchiver;
use anchore_worker::workspace::BuildId;
use anchore_worker::BuildWorker;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments of the scan command
pub struct ScanArgs {
    pub workspace: PathBuf,
    pub job: String,
    pub build: String,
    pub artifacts: Option<PathBuf>,
    pub record: Option<PathBuf>,
}

/// Run one scan execution; returns whether the build passed
pub fn cmd_scan(config: BuildConfig, args: ScanArgs) -> Result<bool> {
    let build_id = BuildId::new(&args.job, &args.build);
    let mut worker =
        BuildWorker::new(config, &args.workspace, build_id, Arc::new(ProcessRunner));
    if let Some(root) = &args.artifacts {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create artifacts root: {}", root.display()))?;
        worker = worker.with_archiver(Box::new(DirectoryArchiver::new(root)));
    }

    let outcome = worker.run();

    match &outcome.report {
        Some(report) => {
            let json = report.to_json().context("Failed to serialize verdict record")?;
            match &args.record {
                Some(path) => {
                    fs::write(path, json).with_context(|| {
                        format!("Failed to write verdict record: {}", path.display())
                    })?;
                    info!("Verdict record written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        None => warn!("No verdict record produced for build {}", outcome.build_id),
    }

    if let Some(cleanup) = &outcome.cleanup
        && !cleanup.is_clean()
    {
        warn!("Cleanup finished with {} warning(s)", cleanup.warnings.len());
    }

    Ok(outcome.passed())
}
