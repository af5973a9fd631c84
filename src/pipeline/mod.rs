//! Conversion stages.
//!
//! Each submodule does one job and is driven by [`crate::Converter`]:
//!
//! ```text
//! input ──▶ preprocess? ──▶ strategy plan ──▶ fast | external | vector | document ──▶ verify
//! (stage)   (flatten)       (ordered list)                                            (non-empty)
//! ```
//!
//! 1. [`input`]      stage an upload (path, bytes, URL) under a unique name
//! 2. [`preprocess`] normalise exotic inputs to PNG through the external tool
//! 3. [`strategy`]   turn a classification into an ordered fallback plan
//! 4. [`fast`]       in-process codec, runs in `spawn_blocking`
//! 5. [`external`]   ImageMagick/potrace subprocesses behind [`external::ExternalConverter`]
//! 6. [`vector`]     bitmap-then-trace tiers for vector targets
//! 7. [`document`]   pdfium page embedding
//! 8. [`transient`]  deletes everything an attempt leaves behind

pub mod document;
pub mod external;
pub mod fast;
pub mod input;
pub mod preprocess;
pub mod strategy;
pub mod transient;
pub mod vector;

use crate::error::{ConvertError, FailureCause};
use crate::format::Format;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A fresh, collision-free file path in `dir` with extension `ext`.
pub fn unique_path(dir: &Path, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", Uuid::new_v4().simple(), ext))
}

/// Check that `path` exists and is non-empty; returns its size.
pub async fn verify_output(path: &Path, target: &Format) -> Result<u64, ConvertError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(ConvertError::failed(
            FailureCause::EmptyOutput,
            target.token(),
            format!("{} is empty", path.display()),
        )),
        Err(e) => Err(ConvertError::failed(
            FailureCause::EmptyOutput,
            target.token(),
            format!("{} missing: {e}", path.display()),
        )),
    }
}
