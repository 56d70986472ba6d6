// src/lib.rs

//! Anchore build worker
//!
//! Scans container images as part of a CI build step. The scanner runs
//! inside a long-lived helper container; this crate stages the build's
//! image manifest into it, runs analyze, gate and query sub-commands,
//! collects their reports and turns the gate exit code into a verdict.
//!
//! # Architecture
//!
//! - `exec`: argument-vector commands, streamed output, verbatim exit codes
//! - `container`: keeps the helper container running
//! - `workspace`: per-build staging, isolated by build id
//! - `scan`: analyze / gate / query and the verdict
//! - `report`: archiving and the verdict record
//! - `cleanup`: best-effort teardown, reached from every state
//! - `worker`: the execution state machine tying it together

pub mod cleanup;
pub mod config;
pub mod container;
mod error;
pub mod exec;
pub mod report;
pub mod scan;
pub mod worker;
pub mod workspace;

pub use config::{BuildConfig, QueryList};
pub use error::{Error, Result};
pub use exec::{CommandLine, CommandRunner, Executor, ProcessRunner, Sink};
pub use report::{ArtifactArchiver, DirectoryArchiver, ReportHandle};
pub use scan::{QueryError, QueryOutcome, QueryResults, Verdict};
pub use worker::{BuildOutcome, BuildResult, BuildWorker, ExecutionState};
pub use workspace::{BuildId, ManifestError, StagedWorkspace};
