// src/workspace/manifest.rs

//! Image manifest parsing
//!
//! One entry per line: `imageId [dockerfilePath]`, tokens separated by runs
//! of whitespace. Lines without a usable first token are skipped with a
//! warning. Duplicates pass through unchanged and entry order is preserved.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors reading the manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Image manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("Cannot read image manifest {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image manifest {0} lists no images")]
    Empty(PathBuf),
}

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManifestEntry {
    pub image_id: String,
    pub dockerfile: Option<PathBuf>,
}

/// Parsed manifest in file order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ImageManifestEntry>,
}

impl Manifest {
    /// Read and parse a manifest file
    ///
    /// Invalid UTF-8 is replaced with U+FFFD rather than rejected.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ManifestError::NotFound(path.to_path_buf())
            } else {
                ManifestError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let manifest = Self::parse(&String::from_utf8_lossy(&bytes));
        if manifest.is_empty() {
            return Err(ManifestError::Empty(path.to_path_buf()));
        }
        Ok(manifest)
    }

    /// Parse manifest text; never fails, unusable lines are skipped
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            let Some(image_id) = tokens.next() else {
                if !line.is_empty() {
                    warn!("Skipping manifest line {}: no image id", index + 1);
                }
                continue;
            };
            let dockerfile = tokens.next().map(PathBuf::from);
            if tokens.next().is_some() {
                warn!(
                    "Ignoring extra tokens on manifest line {} for {}",
                    index + 1,
                    image_id
                );
            }
            entries.push(ImageManifestEntry {
                image_id: image_id.to_string(),
                dockerfile,
            });
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[ImageManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
