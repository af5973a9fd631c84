//! Expiry of stale artifacts.
//!
//! Converted files and archives are short-lived. [`sweep_expired`] deletes
//! every regular file in a directory whose modification time is older than
//! the retention window. It is a single pass; scheduling it is the caller's
//! business. A file that disappears between listing and deletion (a client
//! download racing the sweep, or a second sweeper) is not an error.

use crate::convert::Converter;
use crate::error::ConvertError;
use crate::pipeline::transient::remove_if_exists;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// What one sweep did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    /// Files still inside the window.
    pub kept: usize,
}

/// Delete files in `dir` last modified more than `window` ago.
///
/// A missing directory yields an empty report.
pub async fn sweep_expired(dir: &Path, window: Duration) -> Result<SweepReport, ConvertError> {
    let mut report = SweepReport::default();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => {
            return Err(ConvertError::Internal(format!(
                "cannot list {}: {e}",
                dir.display()
            )))
        }
    };

    let now = SystemTime::now();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Error while listing {}: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        let meta = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < window {
            report.kept += 1;
            continue;
        }
        match remove_if_exists(&path) {
            Ok(true) => {
                debug!("Expired {} (age {}s)", path.display(), age.as_secs());
                report.removed.push(path);
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to remove expired {}: {}", path.display(), e),
        }
    }

    if !report.removed.is_empty() {
        info!(
            "Swept {}: {} removed, {} kept",
            dir.display(),
            report.removed.len(),
            report.kept
        );
    }
    Ok(report)
}

impl Converter {
    /// Sweep the output and upload directories with the configured window.
    pub async fn sweep(&self) -> Result<SweepReport, ConvertError> {
        let window = Duration::from_secs(self.config().retention_secs);
        let mut report = sweep_expired(&self.config().output_dir, window).await?;
        let uploads = sweep_expired(&self.config().upload_dir, window).await?;
        report.removed.extend(uploads.removed);
        report.kept += uploads.kept;
        Ok(report)
    }
}
