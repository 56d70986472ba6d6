// src/report/mod.rs

//! Verdict record and report archiving
//!
//! Publishing hands the local report directory to an `ArtifactArchiver`
//! and builds the immutable `ReportHandle` the UI side renders. Report
//! links follow the archived-artifact layout `../artifact/<dir>/<file>`.

use crate::error::{Error, Result};
use crate::scan::{GateOutcome, GateSummary, QueryResults, Verdict};
use crate::workspace::StagedWorkspace;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Persists a report directory somewhere outside the build workspace
pub trait ArtifactArchiver {
    /// Archive the contents of `dir`
    fn archive(&self, dir: &Path) -> Result<()>;
}

/// Archiver that keeps nothing
///
/// Used when the caller has no artifact store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArchiver;

impl ArtifactArchiver for NoopArchiver {
    fn archive(&self, dir: &Path) -> Result<()> {
        debug!("No artifact store configured, not archiving {}", dir.display());
        Ok(())
    }
}

/// Copies report directories under an artifacts root
#[derive(Debug, Clone)]
pub struct DirectoryArchiver {
    root: PathBuf,
}

impl DirectoryArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactArchiver for DirectoryArchiver {
    fn archive(&self, dir: &Path) -> Result<()> {
        let name = dir.file_name().ok_or_else(|| {
            Error::ArchiveUnavailable(format!("{} has no directory name", dir.display()))
        })?;
        let dest_root = self.root.join(name);

        let mut copied = 0usize;
        for entry in WalkDir::new(dir) {
            let entry = entry.map_err(|e| {
                Error::ArchiveUnavailable(format!("cannot read {}: {}", dir.display(), e))
            })?;
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| Error::ArchiveUnavailable(e.to_string()))?;
            let dest = dest_root.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                fs::copy(entry.path(), &dest)?;
                copied += 1;
            }
        }

        info!("Archived {} file(s) to {}", copied, dest_root.display());
        Ok(())
    }
}

/// Immutable verdict record for the UI collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportHandle {
    /// Empty when gating was skipped
    #[serde(serialize_with = "serialize_status")]
    pub status: Option<Verdict>,
    pub gate_report_url: Option<String>,
    pub query_report_urls: IndexMap<String, String>,
    pub gate_summary: Option<GateSummary>,
    pub build_id: String,
    pub generated_at: DateTime<Utc>,
}

fn serialize_status<S: Serializer>(
    status: &Option<Verdict>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    match status {
        Some(verdict) => s.serialize_str(&verdict.to_string()),
        None => s.serialize_str(""),
    }
}

impl ReportHandle {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Archive link for a report file
pub fn artifact_url(dir_name: &str, file: &str) -> String {
    format!("../artifact/{}/{}", dir_name, file)
}

/// Archives report directories and builds verdict records
pub struct Reporter<'a> {
    archiver: &'a dyn ArtifactArchiver,
}

impl<'a> Reporter<'a> {
    pub fn new(archiver: &'a dyn ArtifactArchiver) -> Self {
        Self { archiver }
    }

    /// Archive the report directory and build the verdict record
    pub fn publish(
        &self,
        workspace: &StagedWorkspace,
        gate: Option<&GateOutcome>,
        queries: &QueryResults,
    ) -> Result<ReportHandle> {
        let dir = workspace.local_dir();
        if !dir.is_dir() {
            return Err(Error::ArchiveUnavailable(format!(
                "report directory {} does not exist",
                dir.display()
            )));
        }

        debug!("Archiving results from {}", dir.display());
        self.archiver.archive(dir)?;

        let dir_name = workspace.local_dir_name();
        let query_report_urls = queries
            .report_files()
            .into_iter()
            .map(|(query, file)| (query, artifact_url(&dir_name, &file)))
            .collect();

        let handle = ReportHandle {
            status: gate.map(|g| g.verdict),
            gate_report_url: gate.map(|g| artifact_url(&dir_name, &g.report_file)),
            query_report_urls,
            gate_summary: gate.and_then(|g| g.summary.clone()),
            build_id: workspace.build_id().to_string(),
            generated_at: Utc::now(),
        };

        info!(
            "Published results for {}: status {}",
            handle.build_id,
            handle.status.map(|v| v.to_string()).unwrap_or_default()
        );
        Ok(handle)
    }
}
