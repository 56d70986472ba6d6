// src/workspace/mod.rs

//! Per-build staging workspace
//!
//! Every execution owns two directories named after its build id: a local
//! report directory under the build workspace, and a staging directory
//! inside the helper container. Concurrent builds stay apart only because
//! their build ids differ; nothing is locked.
//!
//! Staging order matters for failure behaviour:
//!
//! 1. Create the local report directory (pre-existing is fine).
//! 2. Parse the manifest. An empty manifest stops here, before anything is
//!    created inside the container.
//! 3. `mkdir -p` the container directory. Fatal on non-zero exit.
//! 4. Copy each Dockerfile to `dfile.<n>`. Any failure is fatal.
//! 5. Write the sanitised `images` file and copy it in. Fatal.
//! 6. Copy user scripts, policy and global whitelist if present. A failed
//!    copy only logs a warning and the gate runs without that input.

mod manifest;

pub use manifest::{ImageManifestEntry, Manifest, ManifestError};

use crate::config::{
    BuildConfig, DEFAULT_GLOBAL_WHITELIST, DEFAULT_POLICY_NAME, DEFAULT_USER_SCRIPTS, non_blank,
};
use crate::container::ContainerManager;
use crate::error::{Error, Result};
use crate::exec::CommandLine;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of the local report directory
pub const REPORT_DIR_PREFIX: &str = "AnchoreReport.";

/// Parent of every in-container staging directory
pub const CONTAINER_STAGING_ROOT: &str = "/root";

/// Prefix of the in-container staging directory
pub const CONTAINER_DIR_PREFIX: &str = "anchore.";

/// Name of the staged manifest, locally and in the container
pub const IMAGES_FILE: &str = "images";

/// Identifier of one build execution, `{job}_{build}`
///
/// The id becomes a single path component of both staging directories.
/// Path separators (folder-style job names) and commas (matrix job
/// coordinates) become underscores, so `.` and `..` can never stand alone
/// as a component and every id stays inside its own namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(job: &str, build: &str) -> Self {
        let id = format!("{}_{}", job, build)
            .chars()
            .map(|c| match c {
                '/' | '\\' | ',' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layout and staged state of one build's workspace
#[derive(Debug, Clone)]
pub struct StagedWorkspace {
    build_id: BuildId,
    root: PathBuf,
    local_dir: PathBuf,
    container_dir: String,
    input_images: Vec<String>,
    dockerfiles_staged: usize,
    policy_staged: bool,
    whitelist_staged: bool,
    scripts_staged: bool,
}

impl StagedWorkspace {
    /// Compute the layout for `build_id` under the build workspace `root`
    ///
    /// Nothing is created until [`Stager::stage`] runs.
    pub fn new(root: impl Into<PathBuf>, build_id: BuildId) -> Self {
        let root = root.into();
        let local_dir = root.join(format!("{}{}", REPORT_DIR_PREFIX, build_id));
        let container_dir = format!(
            "{}/{}{}",
            CONTAINER_STAGING_ROOT, CONTAINER_DIR_PREFIX, build_id
        );
        Self {
            build_id,
            root,
            local_dir,
            container_dir,
            input_images: Vec::new(),
            dockerfiles_staged: 0,
            policy_staged: false,
            whitelist_staged: false,
            scripts_staged: false,
        }
    }

    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    /// Build workspace the manifest and optional inputs are read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local report directory
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// File name of the local report directory
    pub fn local_dir_name(&self) -> String {
        format!("{}{}", REPORT_DIR_PREFIX, self.build_id)
    }

    /// In-container staging directory
    pub fn container_dir(&self) -> &str {
        &self.container_dir
    }

    /// Path of a file inside the container staging directory
    pub fn container_path(&self, name: &str) -> String {
        format!("{}/{}", self.container_dir, name)
    }

    /// Canonical staged manifest path inside the container
    pub fn images_path(&self) -> String {
        self.container_path(IMAGES_FILE)
    }

    /// Image ids in manifest order, duplicates included
    pub fn input_images(&self) -> &[String] {
        &self.input_images
    }

    pub fn dockerfiles_staged(&self) -> usize {
        self.dockerfiles_staged
    }

    /// Container path of the policy, if it was staged
    pub fn staged_policy(&self) -> Option<String> {
        self.policy_staged
            .then(|| self.container_path(DEFAULT_POLICY_NAME))
    }

    /// Container path of the global whitelist, if it was staged
    pub fn staged_whitelist(&self) -> Option<String> {
        self.whitelist_staged
            .then(|| self.container_path(DEFAULT_GLOBAL_WHITELIST))
    }

    /// Container path of the user scripts directory, if it was staged
    pub fn staged_scripts(&self) -> Option<String> {
        self.scripts_staged
            .then(|| self.container_path(DEFAULT_USER_SCRIPTS))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Host-side inputs to staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInputs {
    pub manifest: PathBuf,
    pub policy: Option<PathBuf>,
    pub global_whitelist: Option<PathBuf>,
    pub user_scripts: Option<PathBuf>,
}

impl StageInputs {
    /// Inputs named by the config, relative to the build workspace
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            manifest: PathBuf::from(&config.name),
            policy: non_blank(&config.policy_name).map(PathBuf::from),
            global_whitelist: non_blank(&config.global_whitelist).map(PathBuf::from),
            user_scripts: non_blank(&config.user_scripts).map(PathBuf::from),
        }
    }
}

/// Copies build inputs into the helper container
pub struct Stager<'a> {
    container: &'a ContainerManager,
}

impl<'a> Stager<'a> {
    pub fn new(container: &'a ContainerManager) -> Self {
        Self { container }
    }

    /// Stage the manifest and optional inputs into `workspace`
    pub fn stage(&self, workspace: &mut StagedWorkspace, inputs: &StageInputs) -> Result<()> {
        info!("Staging build {}", workspace.build_id());

        fs::create_dir_all(workspace.local_dir())?;
        debug!("Report directory {}", workspace.local_dir().display());

        let manifest_path = workspace.resolve(&inputs.manifest);
        let manifest = Manifest::load(&manifest_path)?;
        debug!("Manifest {} lists {} image(s)", manifest_path.display(), manifest.len());

        let mkdir = self
            .container
            .exec(["mkdir", "-p", workspace.container_dir()]);
        self.require("stage-mkdir", &mkdir, || {
            format!("could not create {}", workspace.container_dir())
        })?;

        let mut lines = Vec::with_capacity(manifest.len());
        let mut dfile_counter = 0usize;
        for entry in manifest.entries() {
            let mut line = entry.image_id.clone();
            if let Some(dockerfile) = &entry.dockerfile {
                dfile_counter += 1;
                let target = workspace.container_path(&format!("dfile.{}", dfile_counter));
                let host = workspace.resolve(dockerfile);
                let copy = self.container.copy_in(&host, &target);
                self.require("stage-dockerfile", &copy, || {
                    format!(
                        "could not copy Dockerfile {} for {}",
                        host.display(),
                        entry.image_id
                    )
                })?;
                line.push(' ');
                line.push_str(&target);
            }
            debug!("Staged image {}", line);
            lines.push(line);
            workspace.input_images.push(entry.image_id.clone());
        }
        workspace.dockerfiles_staged = dfile_counter;

        let local_images = workspace.local_dir().join(IMAGES_FILE);
        let mut content = lines.join("\n");
        content.push('\n');
        fs::write(&local_images, content)?;

        let copy = self.container.copy_in(&local_images, &workspace.images_path());
        self.require("stage-images", &copy, || {
            format!("could not copy image list to {}", workspace.images_path())
        })?;

        if let Some(scripts) = &inputs.user_scripts {
            workspace.scripts_staged =
                self.stage_optional(workspace, scripts, DEFAULT_USER_SCRIPTS, "user scripts");
        }
        if let Some(policy) = &inputs.policy {
            workspace.policy_staged =
                self.stage_optional(workspace, policy, DEFAULT_POLICY_NAME, "policy");
        }
        if let Some(whitelist) = &inputs.global_whitelist {
            workspace.whitelist_staged = self.stage_optional(
                workspace,
                whitelist,
                DEFAULT_GLOBAL_WHITELIST,
                "global whitelist",
            );
        }

        info!(
            "Staged {} image(s) into {}",
            workspace.input_images().len(),
            workspace.container_dir()
        );
        Ok(())
    }

    fn require(
        &self,
        label: &str,
        command: &CommandLine,
        describe: impl FnOnce() -> String,
    ) -> Result<()> {
        let code = self
            .container
            .executor()
            .execute(label, command, None, None)?;
        if code != 0 {
            return Err(Error::StagingFailed(format!("{} (exit code {})", describe(), code)));
        }
        Ok(())
    }

    /// Copy an optional input; any failure leaves it unstaged
    fn stage_optional(
        &self,
        workspace: &StagedWorkspace,
        host: &Path,
        name: &str,
        what: &str,
    ) -> bool {
        let host = workspace.resolve(host);
        if !host.exists() {
            debug!("No {} at {}, skipping", what, host.display());
            return false;
        }

        let target = workspace.container_path(name);
        let copy = self.container.copy_in(&host, &target);
        match self.container.executor().execute("stage-optional", &copy, None, None) {
            Ok(0) => {
                debug!("Staged {} to {}", what, target);
                true
            }
            Ok(code) => {
                warn!(
                    "Failed to stage {} {} (exit code {}), continuing without it",
                    what,
                    host.display(),
                    code
                );
                false
            }
            Err(e) => {
                warn!(
                    "Failed to stage {} {}: {}, continuing without it",
                    what,
                    host.display(),
                    e
                );
                false
            }
        }
    }
}
