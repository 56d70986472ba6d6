// src/container/mod.rs

//! Helper container lifecycle
//!
//! The scanner lives in one long-lived container shared by every build on
//! the host. This module makes sure it is running and builds the engine
//! command lines (`exec`, `cp`) other components use to reach into it.
//!
//! `ensure_running` is a single start, image-check, run sequence:
//!
//! 1. `start <id>` doubles as the running check; exit 0 means running.
//! 2. Otherwise `inspect <image>` checks the image exists locally.
//! 3. If it does, `run -d` a new container with the engine socket mounted
//!    plus the optional cache and modules volumes.
//! 4. A missing image is never pulled; that and a failed `run` are fatal.

use crate::config::{BuildConfig, non_blank};
use crate::error::{Error, Result};
use crate::exec::{CommandLine, Executor};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Engine socket, bound into the helper so it can drive the engine itself
pub const ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Mount point of the scanner data cache inside the helper
pub const CACHE_MOUNT_TARGET: &str = "/root/.anchore";

/// Mount point of the scanner modules directory inside the helper
pub const MODULES_MOUNT_TARGET: &str = "/root/anchore_modules";

/// A host path bound into the helper container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Source path on host
    pub source: PathBuf,
    /// Target path in container
    pub target: PathBuf,
}

impl VolumeMount {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Value for the engine's `-v` flag
    pub fn to_flag_value(&self) -> String {
        format!("{}:{}", self.source.display(), self.target.display())
    }
}

/// Starts and addresses the helper container
#[derive(Debug, Clone)]
pub struct ContainerManager {
    executor: Executor,
    engine: String,
    use_sudo: bool,
    container_id: String,
    image: String,
    mounts: Vec<VolumeMount>,
}

impl ContainerManager {
    pub fn new(executor: Executor, config: &BuildConfig) -> Self {
        let mut mounts = vec![VolumeMount::new(ENGINE_SOCKET, ENGINE_SOCKET)];
        if let Some(local) = non_blank(&config.local_vol) {
            mounts.push(VolumeMount::new(local, CACHE_MOUNT_TARGET));
        }
        if let Some(modules) = non_blank(&config.modules_vol) {
            mounts.push(VolumeMount::new(modules, MODULES_MOUNT_TARGET));
        }

        Self {
            executor,
            engine: config.engine.clone(),
            use_sudo: config.use_sudo,
            container_id: config.container_id.clone(),
            image: config.container_image_id.clone(),
            mounts,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Mounts applied when the helper has to be created
    pub fn mounts(&self) -> &[VolumeMount] {
        &self.mounts
    }

    /// Host-level engine invocation, elevated when configured
    pub fn engine(&self) -> CommandLine {
        CommandLine::new(&self.engine).elevated(self.use_sudo)
    }

    /// `exec` into the helper
    pub fn exec<I, S>(&self, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exec_with_env(&[], args)
    }

    /// `exec` into the helper, forwarding the given variables
    ///
    /// Only variable names reach the argument vector; values travel through
    /// the engine process environment.
    pub fn exec_with_env<I, S>(&self, env: &[(&str, &str)], args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cmd = self.engine().arg("exec");
        for (name, value) in env {
            cmd = cmd.arg("-e").arg(*name).env(*name, *value);
        }
        cmd.arg(&self.container_id).args(args)
    }

    /// `cp` a host path into the helper
    pub fn copy_in(&self, host: &Path, container_path: &str) -> CommandLine {
        self.engine()
            .arg("cp")
            .arg(host.display().to_string())
            .arg(format!("{}:{}", self.container_id, container_path))
    }

    /// Make sure the helper container is running
    pub fn ensure_running(&self) -> Result<()> {
        let start = self.engine().arg("start").arg(&self.container_id);
        if self.run_ok("container-start", &start)? {
            debug!("Helper container {} is running", self.container_id);
            return Ok(());
        }

        info!(
            "Helper container {} is not running, checking for image {}",
            self.container_id, self.image
        );
        let inspect = self.engine().arg("inspect").arg(&self.image);
        if !self.run_ok("image-inspect", &inspect)? {
            return Err(Error::ContainerUnavailable(format!(
                "container {} is not running and image {} is not available locally",
                self.container_id, self.image
            )));
        }

        let mut run = self.engine().arg("run").arg("-d");
        for mount in &self.mounts {
            run = run.arg("-v").arg(mount.to_flag_value());
        }
        let run = run
            .arg("--name")
            .arg(&self.container_id)
            .arg(&self.image);

        info!("Launching helper container {} from {}", self.container_id, self.image);
        if !self.run_ok("container-run", &run)? {
            return Err(Error::ContainerUnavailable(format!(
                "failed to launch container {} from image {}",
                self.container_id, self.image
            )));
        }

        info!("Helper container {} launched", self.container_id);
        Ok(())
    }

    fn run_ok(&self, label: &str, command: &CommandLine) -> Result<bool> {
        self.executor
            .succeeds(label, command)
            .map_err(|e| Error::ContainerUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedRunner;
    use std::sync::Arc;

    fn manager(runner: Arc<ScriptedRunner>, config: &BuildConfig) -> ContainerManager {
        ContainerManager::new(Executor::new(runner, false), config)
    }

    #[test]
    fn test_running_container_needs_only_start() {
        let runner = Arc::new(ScriptedRunner::new());
        let config = BuildConfig::default();
        manager(runner.clone(), &config).ensure_running().unwrap();
        assert_eq!(runner.commands(), vec!["docker start jenkins_anchore".to_string()]);
    }

    #[test]
    fn test_stopped_container_launched_with_mounts() {
        let runner = Arc::new(ScriptedRunner::new().on("start", 1, ""));
        let config = BuildConfig {
            local_vol: Some("/var/cache/anchore".to_string()),
            modules_vol: Some("/opt/modules".to_string()),
            ..Default::default()
        };
        manager(runner.clone(), &config).ensure_running().unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1], "docker inspect anchore/jenkins:latest");
        assert_eq!(
            commands[2],
            "docker run -d -v /var/run/docker.sock:/var/run/docker.sock \
             -v /var/cache/anchore:/root/.anchore -v /opt/modules:/root/anchore_modules \
             --name jenkins_anchore anchore/jenkins:latest"
        );
    }

    #[test]
    fn test_optional_volumes_omitted_when_unset() {
        let runner = Arc::new(ScriptedRunner::new().on("start", 1, ""));
        let config = BuildConfig {
            local_vol: Some("  ".to_string()),
            ..Default::default()
        };
        manager(runner.clone(), &config).ensure_running().unwrap();
        let run = &runner.commands()[2];
        assert!(run.contains(ENGINE_SOCKET));
        assert!(!run.contains(CACHE_MOUNT_TARGET));
        assert!(!run.contains(MODULES_MOUNT_TARGET));
    }

    #[test]
    fn test_missing_image_is_unavailable_without_pull() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("start", 1, "")
                .on("inspect", 1, ""),
        );
        let err = manager(runner.clone(), &BuildConfig::default())
            .ensure_running()
            .unwrap_err();
        assert!(matches!(err, Error::ContainerUnavailable(_)));
        assert_eq!(runner.count_matching("run"), 0);
        assert_eq!(runner.count_matching("pull"), 0);
    }

    #[test]
    fn test_failed_run_is_unavailable() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("start", 1, "")
                .on(" run ", 125, ""),
        );
        let err = manager(runner, &BuildConfig::default())
            .ensure_running()
            .unwrap_err();
        assert!(matches!(err, Error::ContainerUnavailable(_)));
    }

    #[test]
    fn test_launch_failure_is_unavailable() {
        let runner = Arc::new(ScriptedRunner::new().fail_launch("docker"));
        let err = manager(runner, &BuildConfig::default())
            .ensure_running()
            .unwrap_err();
        assert!(matches!(err, Error::ContainerUnavailable(_)));
    }

    #[test]
    fn test_sudo_applies_to_engine_commands() {
        let runner = Arc::new(ScriptedRunner::new());
        let config = BuildConfig {
            use_sudo: true,
            ..Default::default()
        };
        let mgr = manager(runner, &config);
        assert_eq!(
            mgr.exec(["mkdir", "-p", "/root/anchore.job_1"]).to_string(),
            "sudo -E docker exec jenkins_anchore mkdir -p /root/anchore.job_1"
        );
        assert_eq!(
            mgr.copy_in(Path::new("/ws/images"), "/root/anchore.job_1/images")
                .to_string(),
            "sudo -E docker cp /ws/images jenkins_anchore:/root/anchore.job_1/images"
        );
    }

    #[test]
    fn test_exec_with_env_keeps_values_out_of_argv() {
        let runner = Arc::new(ScriptedRunner::new());
        let mgr = manager(runner, &BuildConfig::default());
        let cmd = mgr.exec_with_env(&[("ANCHOREPASS", "secret")], ["anchore", "analyze"]);
        assert_eq!(
            cmd.to_string(),
            "docker exec -e ANCHOREPASS jenkins_anchore anchore analyze"
        );
        assert_eq!(cmd.environment(), &[("ANCHOREPASS".to_string(), "secret".to_string())]);
    }
}
