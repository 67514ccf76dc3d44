//! One-time setup markers.
//!
//! A marker file records that a setup stage (reference install, dataset
//! download) already completed for this work root, so later invocations skip
//! it entirely.

use std::io;
use std::path::{Path, PathBuf};

/// A marker file guarding a one-time setup stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelMarker {
    path: PathBuf,
}

impl SentinelMarker {
    /// Creates a marker at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the marker exists.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.path.is_file()
    }

    /// Creates the marker, including missing parent directories.
    pub fn mark(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, crate::utils::iso_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SentinelMarker::new(dir.path().join("left").join(".done"));

        assert!(!marker.is_present());
        marker.mark().unwrap();
        assert!(marker.is_present());
    }

    #[test]
    fn test_directory_is_not_a_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = SentinelMarker::new(dir.path());
        assert!(!marker.is_present());
    }
}
