// src/config/mod.rs

//! Build configuration snapshot
//!
//! A `BuildConfig` is read once at the start of an execution and then only
//! borrowed. It captures everything one build needs: where the manifest and
//! optional policy inputs live, which queries to run, how to reach the
//! helper container, the already-resolved credentials, and the policy knobs
//! that turn a verdict into a pass/fail build result.
//!
//! # Example config.toml
//!
//! ```toml
//! name = "anchore_images"
//! queries = ["cve-scan all", "list-packages all"]
//! bail_on_fail = true
//! container_id = "jenkins_anchore"
//! container_image_id = "anchore/jenkins:latest"
//! local_vol = "/var/lib/anchore"
//! use_sudo = false
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_MANIFEST_NAME: &str = "anchore_images";
pub const DEFAULT_POLICY_NAME: &str = "anchore_policy";
pub const DEFAULT_GLOBAL_WHITELIST: &str = "anchore_global_whitelist";
pub const DEFAULT_USER_SCRIPTS: &str = "anchore_user_scripts";
pub const DEFAULT_CONTAINER_IMAGE: &str = "anchore/jenkins:latest";
pub const DEFAULT_CONTAINER_ID: &str = "jenkins_anchore";
pub const DEFAULT_ENGINE: &str = "docker";
pub const DEFAULT_SCANNER: &str = "anchore";

/// Queries run when the config does not list any
pub const DEFAULT_QUERIES: &[&str] = &[
    "cve-scan all",
    "list-packages all",
    "list-files all",
    "show-pkg-diffs base",
];

const MASK: &str = "****";

/// Effective settings for one build execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Manifest file, relative to the build workspace
    pub name: String,
    /// Policy file, relative to the build workspace
    pub policy_name: Option<String>,
    /// Global whitelist file, relative to the build workspace
    pub global_whitelist: Option<String>,
    /// User scripts directory, relative to the build workspace
    pub user_scripts: Option<String>,
    /// Query texts in execution order
    pub queries: Vec<String>,

    /// Fail the build on a STOP verdict
    pub bail_on_fail: bool,
    /// Fail the build on a WARN verdict
    pub bail_on_warn: bool,
    /// Fail the build when the worker itself fails
    pub bail_on_plugin_fail: bool,
    /// Delete scanned images from the scanner database during cleanup
    pub do_cleanup: bool,
    /// Verbose scanner output and DEBUG-level logging
    pub debug: bool,

    /// Prefix host-level engine invocations with the elevation prefix
    pub use_sudo: bool,
    /// Image the helper container is started from
    pub container_image_id: String,
    /// Name of the long-lived helper container
    pub container_id: String,
    /// Host directory mounted as the scanner's data cache
    pub local_vol: Option<String>,
    /// Host directory mounted as the scanner's modules directory
    pub modules_vol: Option<String>,
    /// Container engine binary on the host
    pub engine: String,
    /// Scanner binary inside the helper container
    pub scanner: String,

    /// Scanner feed credentials, already resolved
    pub anchoreio_user: Option<String>,
    pub anchoreio_pass: Option<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_MANIFEST_NAME.to_string(),
            policy_name: Some(DEFAULT_POLICY_NAME.to_string()),
            global_whitelist: Some(DEFAULT_GLOBAL_WHITELIST.to_string()),
            user_scripts: Some(DEFAULT_USER_SCRIPTS.to_string()),
            queries: DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
            bail_on_fail: true,
            bail_on_warn: false,
            bail_on_plugin_fail: true,
            do_cleanup: false,
            debug: false,
            use_sudo: false,
            container_image_id: DEFAULT_CONTAINER_IMAGE.to_string(),
            container_id: DEFAULT_CONTAINER_ID.to_string(),
            local_vol: None,
            modules_vol: None,
            engine: DEFAULT_ENGINE.to_string(),
            scanner: DEFAULT_SCANNER.to_string(),
            anchoreio_user: None,
            anchoreio_pass: None,
        }
    }
}

impl BuildConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::ConfigInvalid(format!("Failed to parse config: {}", e)))
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigInvalid(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        debug!("Loaded build config from {}", path.display());
        Self::from_toml(&content)
    }

    /// Load `path` if given, else the per-user default file if present, else defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check the minimum required settings
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("container_id", &self.container_id),
            ("container_image_id", &self.container_image_id),
            ("engine", &self.engine),
            ("scanner", &self.scanner),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::ConfigInvalid(format!(
                    "`{}` must not be empty",
                    field
                )));
            }
        }
        Ok(())
    }

    /// `validate`, then resolve the container engine on PATH
    pub fn validate_with_engine(&self) -> Result<PathBuf> {
        self.validate()?;
        let engine = self.locate_engine()?;
        debug!("Using container engine {}", engine.display());
        Ok(engine)
    }

    /// Resolve the container engine binary on PATH
    pub fn locate_engine(&self) -> Result<PathBuf> {
        which::which(&self.engine).map_err(|e| {
            Error::ConfigInvalid(format!(
                "Container engine `{}` not found: {}",
                self.engine, e
            ))
        })
    }

    /// Credentials, only when both halves are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (non_blank(&self.anchoreio_user), non_blank(&self.anchoreio_pass)) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Copy with credentials replaced by a mask, for display
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        if copy.anchoreio_pass.is_some() {
            copy.anchoreio_pass = Some(MASK.to_string());
        }
        copy
    }

    /// Render the masked config as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.masked())
            .map_err(|e| Error::ConfigInvalid(format!("Failed to render config: {}", e)))
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "<unset>".to_string());
        info!("[build] name: {}", self.name);
        info!("[build] policy_name: {}", show(&self.policy_name));
        info!("[build] global_whitelist: {}", show(&self.global_whitelist));
        info!("[build] user_scripts: {}", show(&self.user_scripts));
        for query in &self.queries {
            info!("[build] query: {}", query);
        }
        info!("[build] bail_on_fail: {}", self.bail_on_fail);
        info!("[build] bail_on_warn: {}", self.bail_on_warn);
        info!("[build] bail_on_plugin_fail: {}", self.bail_on_plugin_fail);
        info!("[build] do_cleanup: {}", self.do_cleanup);
        info!("[global] debug: {}", self.debug);
        info!("[global] use_sudo: {}", self.use_sudo);
        info!("[global] container_image_id: {}", self.container_image_id);
        info!("[global] container_id: {}", self.container_id);
        info!("[global] local_vol: {}", show(&self.local_vol));
        info!("[global] modules_vol: {}", show(&self.modules_vol));
        info!("[global] anchoreio_user: {}", show(&self.anchoreio_user));
        if self.anchoreio_pass.is_some() {
            info!("[global] anchoreio_pass: {}", MASK);
        }
    }
}

/// Effective query list: blanks dropped, exact duplicates removed, first occurrence wins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryList {
    queries: Vec<String>,
    skipped_blank: usize,
    skipped_duplicate: usize,
}

impl QueryList {
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for query in raw {
            // Duplicates compare on the exact text; trimming only decides blankness
            let query = query.as_ref();
            if query.trim().is_empty() {
                list.skipped_blank += 1;
            } else if list.queries.iter().any(|q| q == query) {
                list.skipped_duplicate += 1;
            } else {
                list.queries.push(query.to_string());
            }
        }
        list
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn skipped_blank(&self) -> usize {
        self.skipped_blank
    }

    pub fn skipped_duplicate(&self) -> usize {
        self.skipped_duplicate
    }
}

impl BuildConfig {
    /// Configured queries after blank and duplicate removal
    pub fn query_list(&self) -> QueryList {
        QueryList::new(&self.queries)
    }
}

/// Per-user default config location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("anchore-worker").join("config.toml"))
}

/// Treat empty and whitespace-only optional strings as unset
pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
