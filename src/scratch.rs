//! Temporary files created during one run (fetched images, market charts).
//!
//! Every file written into the scratch directory is registered here so the
//! controller and renderer can release them on both success and failure
//! paths. The registry is shared through an `Arc` between the components of
//! a single run; it is never shared across runs.

use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Tracks temporary files and removes them on [`TempFileRegistry::cleanup`].
#[derive(Debug)]
pub struct TempFileRegistry {
    dir: PathBuf,
    paths: Mutex<Vec<PathBuf>>,
}

impl TempFileRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a fresh file in the scratch directory and track it.
    pub fn write(&self, prefix: &str, suffix: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(&self.dir)?;
        file.write_all(bytes)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        self.track(path.clone());
        debug!("Scratch file {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Register an externally created file for removal.
    pub fn track(&self, path: impl Into<PathBuf>) {
        self.paths.lock().push(path.into());
    }

    /// Snapshot of the tracked paths.
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.paths.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Remove every tracked file that still exists and empty the list.
    ///
    /// Removal failures are logged, never raised. Calling this twice is a
    /// no-op the second time. Returns the number of files removed.
    pub fn cleanup(&self) -> usize {
        let paths = std::mem::take(&mut *self.paths.lock());
        let mut removed = 0;
        for path in paths {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove temporary file {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            debug!("Removed {} temporary file(s)", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_tracks_and_cleanup_removes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempFileRegistry::new(dir.path().join("scratch"));
        let a = registry.write("img-", ".png", b"abc").unwrap();
        let b = registry.write("chart-", ".png", b"def").unwrap();
        assert!(a.exists() && b.exists());
        assert_eq!(registry.tracked().len(), 2);

        assert_eq!(registry.cleanup(), 2);
        assert!(!a.exists() && !b.exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn cleanup_skips_files_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempFileRegistry::new(dir.path());
        let a = registry.write("img-", ".png", b"abc").unwrap();
        std::fs::remove_file(&a).unwrap();
        registry.track(dir.path().join("never-existed.png"));

        assert_eq!(registry.cleanup(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn cleanup_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempFileRegistry::new(dir.path());
        registry.write("img-", ".jpg", b"x").unwrap();
        assert_eq!(registry.cleanup(), 1);
        assert_eq!(registry.cleanup(), 0);
        assert!(registry.is_empty());
    }
}
