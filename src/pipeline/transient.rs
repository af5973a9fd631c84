//! Per-attempt cleanup guard.
//!
//! Every file an attempt creates or consumes (the staged input, normalised
//! intermediates, bitmaps for tracing, a half-written output) is registered
//! with a [`TransientFiles`] guard. Dropping the guard deletes all of them,
//! on every exit path including early `?` returns and panics. The final
//! output is released from the guard with [`TransientFiles::keep`] only once
//! it has been verified.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TransientFiles {
    paths: Vec<PathBuf>,
}

impl TransientFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `path` for deletion when the guard drops.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Stop tracking `path`; it survives the guard.
    pub fn keep(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TransientFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match remove_if_exists(&path) {
                Ok(true) => debug!("Removed transient file {}", path.display()),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove transient file {}: {}", path.display(), e),
            }
        }
    }
}

/// Delete a file, treating "already gone" as success.
///
/// Returns whether a file was actually removed. Safe to race against another
/// deleter (the retention sweep, a concurrent cleanup).
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
