// src/worker/mod.rs

//! Build worker: one scanning execution per build step
//!
//! The worker drives the components in order and always finishes with
//! cleanup:
//!
//! 1. Validate the config, and with a real process runner locate the
//!    container engine (an invalid config never starts the execution)
//! 2. Ensure the helper container is running
//! 3. Stage the manifest and optional inputs
//! 4. Analyze
//! 5. Gate
//! 6. Run the query batch (its failures never abort the build)
//! 7. Archive reports and build the verdict record
//! 8. Clean up, whatever happened above
//!
//! The pass/fail result combines the verdict with the bail flags, and
//! fatal errors with the plugin-failure policy.

mod state;

pub use state::ExecutionState;

use crate::cleanup::{CleanupManager, CleanupReport};
use crate::config::BuildConfig;
use crate::container::ContainerManager;
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, Executor};
use crate::report::{ArtifactArchiver, NoopArchiver, ReportHandle, Reporter};
use crate::scan::{GateOutcome, QueryResults, ScanRunner, Verdict};
use crate::workspace::{BuildId, StageInputs, StagedWorkspace, Stager};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, error, info, warn};

/// Signal handed back to the CI orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildResult {
    Success,
    Failure,
}

/// Everything one execution produced
#[derive(Debug)]
pub struct BuildOutcome {
    pub build_id: BuildId,
    pub result: BuildResult,
    /// Last state reached before cleanup
    pub reached: ExecutionState,
    /// Always `Cleaned` once the execution started
    pub state: ExecutionState,
    pub staged_images: Vec<String>,
    pub gate: Option<GateOutcome>,
    pub queries: Option<QueryResults>,
    pub report: Option<ReportHandle>,
    /// Fatal error that ended the execution early, if any
    pub error: Option<Error>,
    pub cleanup: Option<CleanupReport>,
}

impl BuildOutcome {
    pub fn passed(&self) -> bool {
        self.result == BuildResult::Success
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.gate.as_ref().map(|g| g.verdict)
    }

    pub fn analyzed(&self) -> bool {
        self.reached.is_analyzed()
    }
}

/// Partial results accumulated while the execution runs
struct Progress {
    state: ExecutionState,
    gate: Option<GateOutcome>,
    queries: Option<QueryResults>,
    report: Option<ReportHandle>,
}

impl Progress {
    fn enter(&mut self, next: ExecutionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!("State {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Orchestrates one build execution
pub struct BuildWorker {
    config: BuildConfig,
    workspace_root: PathBuf,
    build_id: BuildId,
    executor: Executor,
    archiver: Box<dyn ArtifactArchiver>,
}

impl BuildWorker {
    pub fn new(
        config: BuildConfig,
        workspace_root: impl Into<PathBuf>,
        build_id: BuildId,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let executor = Executor::new(runner, config.debug);
        Self {
            config,
            workspace_root: workspace_root.into(),
            build_id,
            executor,
            archiver: Box::new(NoopArchiver),
        }
    }

    /// Archive report directories through `archiver`
    pub fn with_archiver(mut self, archiver: Box<dyn ArtifactArchiver>) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run the execution to completion
    pub fn run(self) -> BuildOutcome {
        info!("Starting scan for build {}", self.build_id);
        self.config.log_summary();

        let mut workspace = StagedWorkspace::new(&self.workspace_root, self.build_id.clone());
        let mut progress = Progress {
            state: ExecutionState::Init,
            gate: None,
            queries: None,
            report: None,
        };

        let validated = if self.executor.resolves_on_path() {
            self.config.validate_with_engine().map(|_| ())
        } else {
            self.config.validate()
        };
        if let Err(e) = validated {
            error!("{}", e);
            return self.finish(workspace, progress, Some(e), None);
        }

        let container = ContainerManager::new(self.executor.clone(), &self.config);
        let error = self.drive(&container, &mut workspace, &mut progress).err();
        if let Some(e) = &error {
            error!(
                "Build {} stopped in state {}: {} ({})",
                self.build_id,
                progress.state,
                e,
                e.kind()
            );
        }

        let reached = progress.state;
        let cleanup =
            CleanupManager::new(&container, &self.config.scanner, self.config.do_cleanup)
                .cleanup(&workspace);
        progress.enter(ExecutionState::Cleaned);

        let mut outcome = self.finish(workspace, progress, error, Some(cleanup));
        outcome.reached = reached;
        outcome
    }

    fn drive(
        &self,
        container: &ContainerManager,
        workspace: &mut StagedWorkspace,
        progress: &mut Progress,
    ) -> Result<()> {
        container.ensure_running()?;

        Stager::new(container).stage(workspace, &StageInputs::from_config(&self.config))?;
        progress.enter(ExecutionState::Staged);

        let workspace = &*workspace;
        let mut scan =
            ScanRunner::new(container, workspace, &self.config.scanner, self.config.debug);
        if let Some((user, pass)) = self.config.credentials() {
            scan = scan.with_credentials(user, pass);
        }

        scan.analyze()?;
        progress.enter(ExecutionState::Analyzed);

        let gate = scan.gate()?;
        progress.gate = Some(gate);
        progress.enter(ExecutionState::Gated);

        let queries = self.config.query_list();
        if queries.is_empty() {
            debug!("No queries configured");
        } else {
            match scan.queries(&queries) {
                Ok(results) => {
                    info!(
                        "{} of {} queries produced a report",
                        results.report_files().len(),
                        results.len()
                    );
                    progress.queries = Some(results);
                    progress.enter(ExecutionState::Queried);
                }
                Err(e) => warn!("Query phase failed, continuing: {}", e),
            }
        }

        let empty = QueryResults::default();
        let handle = Reporter::new(self.archiver.as_ref()).publish(
            workspace,
            progress.gate.as_ref(),
            progress.queries.as_ref().unwrap_or(&empty),
        )?;
        progress.report = Some(handle);
        progress.enter(ExecutionState::Reported);

        Ok(())
    }

    fn finish(
        &self,
        workspace: StagedWorkspace,
        progress: Progress,
        error: Option<Error>,
        cleanup: Option<CleanupReport>,
    ) -> BuildOutcome {
        let verdict = progress.gate.as_ref().map(|g| g.verdict);
        let result = self.evaluate(verdict, error.as_ref());
        info!("Build {} result: {}", self.build_id, result);

        BuildOutcome {
            build_id: self.build_id.clone(),
            result,
            reached: progress.state,
            state: progress.state,
            staged_images: workspace.input_images().to_vec(),
            gate: progress.gate,
            queries: progress.queries,
            report: progress.report,
            error,
            cleanup,
        }
    }

    /// Combine the verdict, the bail flags and the plugin-failure policy
    fn evaluate(&self, verdict: Option<Verdict>, error: Option<&Error>) -> BuildResult {
        let verdict_fails = match verdict {
            Some(Verdict::Stop) => self.config.bail_on_fail,
            Some(Verdict::Warn) => self.config.bail_on_warn,
            Some(Verdict::Go) | None => false,
        };
        if verdict_fails {
            info!(
                "Failing build on {} verdict",
                verdict.map(|v| v.to_string()).unwrap_or_default()
            );
            return BuildResult::Failure;
        }

        match error {
            Some(_) if self.config.bail_on_plugin_fail => BuildResult::Failure,
            Some(e) => {
                warn!("Proceeding despite scan failure: {}", e);
                BuildResult::Success
            }
            None => BuildResult::Success,
        }
    }
}
