// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use anchore_worker::BuildConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub use anchore_worker::exec::scripted::ScriptedRunner;

/// Temporary build workspace with a manifest
pub struct BuildFixture {
    pub dir: TempDir,
}

impl BuildFixture {
    pub fn with_manifest(lines: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(dir.path().join("anchore_images"), content).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    pub fn report_dir(&self, build_id: &str) -> PathBuf {
        self.dir.path().join(format!("AnchoreReport.{}", build_id))
    }
}

/// Config with no optional inputs and the given queries
pub fn minimal_config(queries: &[&str]) -> BuildConfig {
    BuildConfig {
        policy_name: None,
        global_whitelist: None,
        user_scripts: None,
        queries: queries.iter().map(|q| q.to_string()).collect(),
        ..Default::default()
    }
}
