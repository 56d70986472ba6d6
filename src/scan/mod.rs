// src/scan/mod.rs

//! Scanner invocations against a staged workspace
//!
//! Three operations, in the order a build runs them:
//!
//! - `analyze` must succeed before anything else is allowed.
//! - `gate` captures the gate report and maps the exit code to a verdict.
//! - `queries` runs each configured query once, in order, into its own
//!   numbered report. A failing query is recorded and the batch continues.
//!
//! The scanner is reached through `<engine> exec <helper> <scanner> ...`;
//! its exit code is the only structured signal, everything else is in the
//! captured output file.

pub mod summary;

pub use summary::{ActionTotals, ColumnHeader, GateSummary, ImageSummary};

use crate::config::QueryList;
use crate::container::ContainerManager;
use crate::error::{Error, Result};
use crate::exec::CommandLine;
use crate::workspace::StagedWorkspace;
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::{self, File};
use std::path::PathBuf;
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Gate report file name
pub const GATE_REPORT_FILE: &str = "anchore_gates.json";

/// Query report file name prefix, followed by `<n>.json`
pub const QUERY_REPORT_PREFIX: &str = "anchore_query_";

/// Environment variables carrying scanner feed credentials
pub const USER_ENV: &str = "ANCHOREUSER";
pub const PASS_ENV: &str = "ANCHOREPASS";

/// Gate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Go,
    Warn,
    Stop,
}

impl Verdict {
    /// 0 is GO, 2 is WARN, anything else is STOP
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Go,
            2 => Self::Warn,
            _ => Self::Stop,
        }
    }
}

/// Why a query produced no report
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query exited with code {0}")]
    NonZeroExit(i32),

    #[error("query produced no output")]
    EmptyOutput,

    #[error("query could not be executed: {0}")]
    Execution(String),

    #[error("query report could not be written: {0}")]
    ReportWrite(String),
}

/// Report file name on success
pub type QueryOutcome = std::result::Result<String, QueryError>;

/// Per-query outcomes keyed by query text, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResults {
    outcomes: IndexMap<String, QueryOutcome>,
}

impl QueryResults {
    pub fn get(&self, query: &str) -> Option<&QueryOutcome> {
        self.outcomes.get(query)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryOutcome)> {
        self.outcomes.iter().map(|(q, o)| (q.as_str(), o))
    }

    /// Number of queries attempted
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Queries that produced a report, mapped to its file name
    pub fn report_files(&self) -> IndexMap<String, String> {
        self.outcomes
            .iter()
            .filter_map(|(query, outcome)| {
                outcome
                    .as_ref()
                    .ok()
                    .map(|file| (query.clone(), file.clone()))
            })
            .collect()
    }

    fn record(&mut self, query: &str, outcome: QueryOutcome) {
        self.outcomes.insert(query.to_string(), outcome);
    }
}

/// Result of a gate run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub exit_code: i32,
    /// Report file name inside the local report directory
    pub report_file: String,
    /// Best-effort summary of the report
    pub summary: Option<GateSummary>,
}

/// Runs scanner sub-commands for one staged workspace
pub struct ScanRunner<'a> {
    container: &'a ContainerManager,
    workspace: &'a StagedWorkspace,
    scanner: String,
    debug: bool,
    credentials: Option<(String, String)>,
    analyzed: bool,
    query_counter: usize,
}

impl<'a> ScanRunner<'a> {
    pub fn new(
        container: &'a ContainerManager,
        workspace: &'a StagedWorkspace,
        scanner: impl Into<String>,
        debug: bool,
    ) -> Self {
        Self {
            container,
            workspace,
            scanner: scanner.into(),
            debug,
            credentials: None,
            analyzed: false,
            query_counter: 0,
        }
    }

    /// Forward feed credentials to every scanner invocation
    pub fn with_credentials(mut self, user: &str, pass: &str) -> Self {
        self.credentials = Some((user.to_string(), pass.to_string()));
        self
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    fn scanner_command<I, S>(&self, json: bool, subcommand: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args: Vec<String> = vec![self.scanner.clone()];
        if json {
            args.push("--json".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        if let Some(scripts) = self.workspace.staged_scripts() {
            args.push("--config-override".to_string());
            args.push(format!("user_scripts_dir={}", scripts));
        }
        args.extend(subcommand.into_iter().map(Into::into));

        let env: Vec<(&str, &str)> = match &self.credentials {
            Some((user, pass)) => vec![(USER_ENV, user.as_str()), (PASS_ENV, pass.as_str())],
            None => Vec::new(),
        };
        self.container.exec_with_env(&env, args)
    }

    /// Analyze every staged image
    pub fn analyze(&mut self) -> Result<()> {
        info!("Analyzing images in {}", self.workspace.images_path());
        let cmd = self.scanner_command(
            false,
            ["analyze".to_string(), "--imagefile".to_string(), self.workspace.images_path()],
        );
        let code = self
            .container
            .executor()
            .execute("analyze", &cmd, None, None)?;
        if code != 0 {
            return Err(Error::AnalysisFailed(code));
        }
        self.analyzed = true;
        info!("Analysis completed");
        Ok(())
    }

    /// Evaluate the gate policy and write the gate report
    pub fn gate(&mut self) -> Result<GateOutcome> {
        if !self.analyzed {
            return Err(Error::NotAnalyzed);
        }

        let mut args = vec![
            "gate".to_string(),
            "--imagefile".to_string(),
            self.workspace.images_path(),
        ];
        if let Some(policy) = self.workspace.staged_policy() {
            args.push("--policy".to_string());
            args.push(policy);
        }
        if let Some(whitelist) = self.workspace.staged_whitelist() {
            args.push("--global-whitelist".to_string());
            args.push(whitelist);
        }
        let cmd = self.scanner_command(true, args);

        let path = self.workspace.local_dir().join(GATE_REPORT_FILE);
        let mut file = File::create(&path).map_err(|source| Error::ReportWriteFailed {
            path: path.clone(),
            source,
        })?;

        info!("Running gate evaluation");
        let code = match self
            .container
            .executor()
            .execute("gate", &cmd, Some(&mut file), None)
        {
            Ok(code) => code,
            Err(Error::OutputSink { source, .. }) => {
                return Err(Error::ReportWriteFailed { path, source });
            }
            Err(e) => return Err(e),
        };
        drop(file);

        let verdict = Verdict::from_exit_code(code);
        info!("Gate evaluation finished with exit code {}: {}", code, verdict);

        let summary = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|out| GateSummary::from_gate_output(&out).map_err(|e| e.to_string()))
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Could not summarize gate report {}: {}", path.display(), e);
                None
            }
        };

        Ok(GateOutcome {
            verdict,
            exit_code: code,
            report_file: GATE_REPORT_FILE.to_string(),
            summary,
        })
    }

    /// Run each query once, in order, into its own numbered report
    pub fn queries(&mut self, queries: &QueryList) -> Result<QueryResults> {
        if !self.analyzed {
            return Err(Error::NotAnalyzed);
        }

        if queries.skipped_blank() > 0 || queries.skipped_duplicate() > 0 {
            debug!(
                "Skipping {} blank and {} duplicate queries",
                queries.skipped_blank(),
                queries.skipped_duplicate()
            );
        }

        let mut results = QueryResults::default();
        for query in queries.iter() {
            let outcome = self.run_query(query);
            match &outcome {
                Ok(file) => info!("Query '{}' written to {}", query, file),
                Err(e) => warn!("Query '{}' dropped: {}", query, e),
            }
            results.record(query, outcome);
        }
        Ok(results)
    }

    fn run_query(&mut self, query: &str) -> QueryOutcome {
        // Numbers are consumed even when the query fails
        self.query_counter += 1;
        let file_name = format!("{}{}.json", QUERY_REPORT_PREFIX, self.query_counter);
        let path = self.workspace.local_dir().join(&file_name);

        let mut args = vec![
            "query".to_string(),
            "--imagefile".to_string(),
            self.workspace.images_path(),
        ];
        args.extend(query.split_whitespace().map(str::to_string));
        let cmd = self.scanner_command(true, args);

        let mut file = File::create(&path).map_err(|e| QueryError::ReportWrite(e.to_string()))?;
        let label = format!("query-{}", self.query_counter);
        let result = self
            .container
            .executor()
            .execute(&label, &cmd, Some(&mut file), None);
        drop(file);

        let outcome = match result {
            Ok(0) => match fs::metadata(&path) {
                Ok(meta) if meta.len() > 0 => return Ok(file_name),
                Ok(_) => QueryError::EmptyOutput,
                Err(e) => QueryError::ReportWrite(e.to_string()),
            },
            Ok(code) => QueryError::NonZeroExit(code),
            Err(Error::OutputSink { source, .. }) => QueryError::ReportWrite(source.to_string()),
            Err(e) => QueryError::Execution(e.to_string()),
        };

        discard_report(path);
        Err(outcome)
    }
}

fn discard_report(path: PathBuf) {
    if let Err(e) = fs::remove_file(&path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        debug!("Could not remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::exec::Executor;
    use crate::exec::scripted::ScriptedRunner;
    use crate::workspace::BuildId;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        runner: Arc<ScriptedRunner>,
        container: ContainerManager,
        workspace: StagedWorkspace,
    }

    fn fixture(runner: ScriptedRunner) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let workspace = StagedWorkspace::new(dir.path(), BuildId::new("job", "3"));
        fs::create_dir_all(workspace.local_dir()).unwrap();
        let runner = Arc::new(runner);
        let container =
            ContainerManager::new(Executor::new(runner.clone(), false), &BuildConfig::default());
        Fixture {
            _dir: dir,
            runner,
            container,
            workspace,
        }
    }

    #[test]
    fn test_verdict_from_exit_code() {
        assert_eq!(Verdict::from_exit_code(0), Verdict::Go);
        assert_eq!(Verdict::from_exit_code(2), Verdict::Warn);
        assert_eq!(Verdict::from_exit_code(1), Verdict::Stop);
        assert_eq!(Verdict::from_exit_code(127), Verdict::Stop);
        assert_eq!(Verdict::from_exit_code(-1), Verdict::Stop);
        assert_eq!(Verdict::Warn.to_string(), "WARN");
        assert_eq!("STOP".parse::<Verdict>().unwrap(), Verdict::Stop);
    }

    #[test]
    fn test_gate_before_analyze_is_rejected() {
        let f = fixture(ScriptedRunner::new());
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        assert!(matches!(scan.gate(), Err(Error::NotAnalyzed)));
        assert!(matches!(
            scan.queries(&QueryList::new(["list-packages"])),
            Err(Error::NotAnalyzed)
        ));
        assert!(f.runner.commands().is_empty());
    }

    #[test]
    fn test_failed_analyze_keeps_gate_locked() {
        let f = fixture(ScriptedRunner::new().on("analyze", 1, ""));
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        assert!(matches!(scan.analyze(), Err(Error::AnalysisFailed(1))));
        assert!(!scan.is_analyzed());
        assert!(matches!(scan.gate(), Err(Error::NotAnalyzed)));
    }

    #[test]
    fn test_analyze_command_line() {
        let f = fixture(ScriptedRunner::new());
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", true);
        scan.analyze().unwrap();
        assert_eq!(
            f.runner.commands()[0],
            "docker exec jenkins_anchore anchore --debug analyze --imagefile /root/anchore.job_3/images"
        );
    }

    #[test]
    fn test_gate_verdict_ignores_output() {
        let f = fixture(ScriptedRunner::new().on(" gate ", 2, "{\"img\": {}}"));
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let outcome = scan.gate().unwrap();
        assert_eq!(outcome.verdict, Verdict::Warn);
        assert_eq!(outcome.report_file, GATE_REPORT_FILE);
        let written = fs::read_to_string(f.workspace.local_dir().join(GATE_REPORT_FILE)).unwrap();
        assert_eq!(written, "{\"img\": {}}");
        assert!(outcome.summary.is_some());

        let gate_cmd = &f.runner.commands()[1];
        assert!(gate_cmd.contains("anchore --json gate --imagefile"));
        assert!(!gate_cmd.contains("--policy"));
    }

    #[test]
    fn test_gate_unparseable_output_still_gives_verdict() {
        let f = fixture(ScriptedRunner::new().on(" gate ", 0, "plain text"));
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let outcome = scan.gate().unwrap();
        assert_eq!(outcome.verdict, Verdict::Go);
        assert!(outcome.summary.is_none());
    }

    #[test]
    fn test_gate_report_unwritable_is_fatal() {
        let f = fixture(ScriptedRunner::new());
        fs::remove_dir_all(f.workspace.local_dir()).unwrap();
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        assert!(matches!(scan.gate(), Err(Error::ReportWriteFailed { .. })));
    }

    #[test]
    fn test_gate_output_stream_failure_is_report_write_failure() {
        let f = fixture(ScriptedRunner::new().fail_output(" gate "));
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        match scan.gate() {
            Err(Error::ReportWriteFailed { path, source }) => {
                assert_eq!(path, f.workspace.local_dir().join(GATE_REPORT_FILE));
                assert_eq!(source.kind(), std::io::ErrorKind::StorageFull);
            }
            other => panic!("expected ReportWriteFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_query_output_stream_failure_drops_query() {
        let f = fixture(ScriptedRunner::new().fail_output("cve-scan"));
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let results = scan
            .queries(&QueryList::new(["cve-scan all", "list-packages all"]))
            .unwrap();
        assert!(matches!(
            results.get("cve-scan all"),
            Some(Err(QueryError::ReportWrite(_)))
        ));
        assert!(!f.workspace.local_dir().join("anchore_query_1.json").exists());
        assert_eq!(results.report_files().len(), 0);
    }

    #[test]
    fn test_queries_dedup_and_order() {
        let f = fixture(
            ScriptedRunner::new()
                .on("images a", 0, "[1]")
                .on("images b", 0, "[2]"),
        );
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let results = scan.queries(&QueryList::new(["a", "", "a", "b"])).unwrap();

        assert_eq!(f.runner.count_matching(" query "), 2);
        let files = results.report_files();
        let keys: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(files["a"], "anchore_query_1.json");
        assert_eq!(files["b"], "anchore_query_2.json");
    }

    #[test]
    fn test_failed_and_empty_queries_are_dropped() {
        let f = fixture(
            ScriptedRunner::new()
                .on("cve-scan", 1, "partial")
                .on("list-files", 0, "")
                .on("list-packages", 0, "[\"pkg\"]"),
        );
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let results = scan
            .queries(&QueryList::new(["cve-scan all", "list-files all", "list-packages all"]))
            .unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results.get("cve-scan all"), Some(&Err(QueryError::NonZeroExit(1))));
        assert_eq!(results.get("list-files all"), Some(&Err(QueryError::EmptyOutput)));
        assert_eq!(
            results.get("list-packages all"),
            Some(&Ok("anchore_query_3.json".to_string()))
        );

        let dir = f.workspace.local_dir();
        assert!(!dir.join("anchore_query_1.json").exists());
        assert!(!dir.join("anchore_query_2.json").exists());
        assert!(dir.join("anchore_query_3.json").exists());
        assert_eq!(results.report_files().len(), 1);
    }

    #[test]
    fn test_query_launch_failure_does_not_abort_batch() {
        let f = fixture(
            ScriptedRunner::new()
                .fail_launch("show-pkg-diffs")
                .on("list-packages", 0, "[]"),
        );
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        let results = scan
            .queries(&QueryList::new(["show-pkg-diffs base", "list-packages all"]))
            .unwrap();
        assert!(matches!(
            results.get("show-pkg-diffs base"),
            Some(Err(QueryError::Execution(_)))
        ));
        assert!(matches!(results.get("list-packages all"), Some(Ok(_))));
    }

    #[test]
    fn test_query_tokens_split_on_whitespace() {
        let f = fixture(ScriptedRunner::new());
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false);
        scan.analyze().unwrap();
        scan.queries(&QueryList::new(["cve-scan   all"])).unwrap();
        assert!(
            f.runner.commands()[1]
                .ends_with("query --imagefile /root/anchore.job_3/images cve-scan all")
        );
    }

    #[test]
    fn test_credentials_forwarded_as_env() {
        let f = fixture(ScriptedRunner::new());
        let mut scan = ScanRunner::new(&f.container, &f.workspace, "anchore", false)
            .with_credentials("user", "secret");
        scan.analyze().unwrap();
        let cmd = &f.runner.commands()[0];
        assert!(cmd.starts_with("docker exec -e ANCHOREUSER -e ANCHOREPASS jenkins_anchore"));
        assert!(!cmd.contains("secret"));
    }
}
