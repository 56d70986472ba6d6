// src/cleanup/mod.rs

//! Best-effort teardown of a build's staging artifacts
//!
//! Cleanup is reached from every execution state, so it never fails. Each
//! step runs whatever happened before it, and problems are only logged.

use crate::container::ContainerManager;
use crate::workspace::StagedWorkspace;
use std::fs;
use std::io::ErrorKind;
use tracing::{debug, info, warn};

/// What one cleanup pass managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub local_removed: bool,
    pub container_removed: bool,
    pub images_deleted: usize,
    pub warnings: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Removes local and in-container staging for one workspace
pub struct CleanupManager<'a> {
    container: &'a ContainerManager,
    scanner: String,
    delete_images: bool,
}

impl<'a> CleanupManager<'a> {
    pub fn new(
        container: &'a ContainerManager,
        scanner: impl Into<String>,
        delete_images: bool,
    ) -> Self {
        Self {
            container,
            scanner: scanner.into(),
            delete_images,
        }
    }

    /// Tear down everything `workspace` staged; safe to call repeatedly
    pub fn cleanup(&self, workspace: &StagedWorkspace) -> CleanupReport {
        debug!("Cleaning up build {}", workspace.build_id());
        let mut report = CleanupReport::default();

        match fs::remove_dir_all(workspace.local_dir()) {
            Ok(()) => report.local_removed = true,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already removed", workspace.local_dir().display());
            }
            Err(e) => report.warn(format!(
                "Failed to remove {}: {}",
                workspace.local_dir().display(),
                e
            )),
        }

        let rm = self.container.exec(["rm", "-rf", workspace.container_dir()]);
        match self.container.executor().execute("cleanup", &rm, None, None) {
            Ok(0) => report.container_removed = true,
            Ok(code) => report.warn(format!(
                "Failed to remove {} in container (exit code {})",
                workspace.container_dir(),
                code
            )),
            Err(e) => report.warn(format!(
                "Failed to remove {} in container: {}",
                workspace.container_dir(),
                e
            )),
        }

        if self.delete_images {
            let mut seen: Vec<&str> = Vec::new();
            for image in workspace.input_images() {
                if seen.contains(&image.as_str()) {
                    continue;
                }
                seen.push(image);
                if self.delete_image(image, &mut report) {
                    report.images_deleted += 1;
                }
            }
        }

        if report.is_clean() {
            info!("Cleanup of build {} finished", workspace.build_id());
        }
        report
    }

    fn delete_image(&self, image: &str, report: &mut CleanupReport) -> bool {
        debug!("Deleting {} from scanner database", image);
        let cmd = self.container.exec([
            self.scanner.as_str(),
            "toolbox",
            "--image",
            image,
            "delete",
            "--dontask",
        ]);
        match self.container.executor().execute("cleanup-image", &cmd, None, None) {
            Ok(0) => true,
            Ok(code) => {
                report.warn(format!("Failed to delete {} (exit code {})", image, code));
                false
            }
            Err(e) => {
                report.warn(format!("Failed to delete {}: {}", image, e));
                false
            }
        }
    }
}
